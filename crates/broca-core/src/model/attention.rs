//! Multi-head scaled dot-product attention.
//!
//! Used three ways: encoder self-attention, masked decoder self-attention,
//! and decoder cross-attention over the encoder memory. The caller picks
//! the roles by what it passes as query, key and value.
//!
//! # Formula
//!
//! `Attention(Q, K, V) = softmax(Q Kᵀ / sqrt(d_k)) V`, per head.
//!
//! Masked positions are forced to `-inf` *before* the softmax so they end
//! up with exactly zero probability mass; rescaling weights afterwards
//! would leak mass into padding and future positions.
//!
//! # Reference
//!
//! [Attention Is All You Need](https://arxiv.org/abs/1706.03762)

use crate::error::{BrocaError, Result};
use candle_core::{D, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder};

/// Multi-head attention block.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    /// Query projection: [d_model, d_model].
    w_q: Linear,
    /// Key projection: [d_model, d_model].
    w_k: Linear,
    /// Value projection: [d_model, d_model].
    w_v: Linear,
    /// Output projection: [d_model, d_model].
    w_o: Linear,
    /// Number of heads.
    num_heads: usize,
    /// Per-head width.
    head_dim: usize,
    /// Dropout on the attention weights.
    dropout: Dropout,
}

impl MultiHeadAttention {
    /// Create a new attention block.
    ///
    /// Fails immediately when `d_model` is not divisible by `num_heads`;
    /// an invalid configuration must never survive to forward time.
    pub fn new(d_model: usize, num_heads: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || d_model % num_heads != 0 {
            return Err(BrocaError::InvalidConfig(format!(
                "d_model {} is not divisible by num_heads {}",
                d_model, num_heads
            )));
        }
        Ok(Self {
            w_q: candle_nn::linear(d_model, d_model, vb.pp("w_q"))?,
            w_k: candle_nn::linear(d_model, d_model, vb.pp("w_k"))?,
            w_v: candle_nn::linear(d_model, d_model, vb.pp("w_v"))?,
            w_o: candle_nn::linear(d_model, d_model, vb.pp("w_o"))?,
            num_heads,
            head_dim: d_model / num_heads,
            dropout: Dropout::new(dropout),
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `query` - `(batch, q_len, d_model)`
    /// * `key`, `value` - `(batch, k_len, d_model)`
    /// * `mask` - optional visibility mask `(batch|1, q_len|1, k_len)`,
    ///   broadcast over the head dimension
    /// * `train` - whether weight dropout is active
    ///
    /// # Returns
    ///
    /// The attended output `(batch, q_len, d_model)` and the attention
    /// weights `(batch, heads, q_len, k_len)`. Weights are a return value
    /// rather than retained state, so the block stays safe to share.
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (batch, q_len, _) = query.dims3()?;
        let (_, k_len, _) = key.dims3()?;

        // Project and split into heads: (batch, heads, len, head_dim).
        let q = self
            .w_q
            .forward(query)?
            .reshape((batch, q_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .w_k
            .forward(key)?
            .reshape((batch, k_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .w_v
            .forward(value)?
            .reshape((batch, k_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;

        // Scores: Q @ Kᵀ / sqrt(d_k).
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.contiguous()?.matmul(&k.transpose(D::Minus2, D::Minus1)?.contiguous()?)? * scale)?;

        let scores = match mask {
            Some(mask) => {
                self.check_mask(mask, batch, q_len, k_len)?;
                let mask = mask.unsqueeze(1)?.broadcast_as(scores.shape())?;
                let neg_inf =
                    Tensor::full(f32::NEG_INFINITY, scores.shape(), scores.device())?;
                mask.where_cond(&scores, &neg_inf)?
            }
            None => scores,
        };

        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let weights = self.dropout.forward(&weights, train)?;

        // Weighted sum over values, concat heads, output projection.
        let context = weights.matmul(&v.contiguous()?)?;
        let context = context
            .transpose(1, 2)?
            .reshape((batch, q_len, self.num_heads * self.head_dim))?;
        let output = self.w_o.forward(&context)?;

        Ok((output, weights))
    }

    /// Validate a mask against the attention shapes.
    ///
    /// A mismatch here is a caller invariant violation, not a data issue,
    /// so it is a hard failure.
    fn check_mask(&self, mask: &Tensor, batch: usize, q_len: usize, k_len: usize) -> Result<()> {
        let dims = mask.dims();
        let ok = dims.len() == 3
            && (dims[0] == batch || dims[0] == 1)
            && (dims[1] == q_len || dims[1] == 1)
            && dims[2] == k_len;
        if !ok {
            return Err(BrocaError::ShapeMismatch(format!(
                "mask {:?} does not broadcast over attention scores ({}, {}, {}, {})",
                dims, batch, self.num_heads, q_len, k_len
            )));
        }
        Ok(())
    }

    /// Number of heads.
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Per-head width.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}
