//! Encoder stack.

use super::attention::MultiHeadAttention;
use super::config::ModelConfig;
use super::feedforward::FeedForward;
use super::sublayer::{build_norm, SublayerConnection};
use crate::error::Result;
use candle_core::Tensor;
use candle_nn::{LayerNorm, Module, VarBuilder};

/// A single encoder layer: self-attention then feed-forward, each wrapped
/// in a pre-norm residual sublayer.
#[derive(Debug, Clone)]
pub struct EncoderLayer {
    /// Self-attention over the source sequence.
    self_attn: MultiHeadAttention,
    /// Position-wise feed-forward block.
    feed_forward: FeedForward,
    /// Residual wrappers, one per block.
    sublayers: [SublayerConnection; 2],
    /// Layer index (for debugging).
    layer_idx: usize,
}

impl EncoderLayer {
    /// Create a new encoder layer.
    pub fn new(config: &ModelConfig, layer_idx: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: MultiHeadAttention::new(
                config.d_model,
                config.num_heads,
                config.dropout,
                vb.pp("self_attn"),
            )?,
            feed_forward: FeedForward::new(
                config.d_model,
                config.d_ff,
                config.dropout,
                vb.pp("feed_forward"),
            )?,
            sublayers: [
                SublayerConnection::new(config.d_model, config.dropout, vb.pp("sublayer_0"))?,
                SublayerConnection::new(config.d_model, config.dropout, vb.pp("sublayer_1"))?,
            ],
            layer_idx,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input `(batch, src_len, d_model)`
    /// * `src_mask` - Source padding mask `(batch, 1, src_len)`
    pub fn forward(&self, x: &Tensor, src_mask: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.sublayers[0].forward(x, train, |x| {
            let (out, _) = self.self_attn.forward(x, x, x, Some(src_mask), train)?;
            Ok(out)
        })?;
        self.sublayers[1].forward(&x, train, |x| self.feed_forward.forward(x, train))
    }

    /// Layer index.
    pub fn layer_idx(&self) -> usize {
        self.layer_idx
    }
}

/// Encoder: N identical layers plus a final normalization.
///
/// Layers share structure but are independently constructed and
/// initialized, each under its own parameter prefix.
#[derive(Debug, Clone)]
pub struct Encoder {
    /// Ordered layer stack.
    layers: Vec<EncoderLayer>,
    /// Final normalization after the last layer.
    norm: LayerNorm,
}

impl Encoder {
    /// Create a new encoder stack.
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(EncoderLayer::new(config, i, vb.pp(format!("layer_{i}")))?);
        }
        Ok(Self {
            layers,
            norm: build_norm(config.d_model, vb.pp("norm"))?,
        })
    }

    /// Run the stack over an embedded source sequence.
    pub fn forward(&self, x: &Tensor, src_mask: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = x.clone();
        for layer in &self.layers {
            x = layer.forward(&x, src_mask, train)?;
        }
        Ok(self.norm.forward(&x)?)
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
