//! Position-wise feed-forward block.
//!
//! Applied independently at every sequence position: expand to the inner
//! width, rectify, drop, project back.
//!
//! # Formula
//!
//! `FFN(x) = W2 · dropout(relu(W1 · x))`

use crate::error::Result;
use candle_core::Tensor;
use candle_nn::{Dropout, Linear, Module, VarBuilder};

/// Two-layer position-wise feed-forward block.
#[derive(Debug, Clone)]
pub struct FeedForward {
    /// Expansion: d_model -> d_ff.
    w_1: Linear,
    /// Contraction: d_ff -> d_model.
    w_2: Linear,
    /// Dropout between the layers.
    dropout: Dropout,
    /// Model width.
    d_model: usize,
    /// Inner width.
    d_ff: usize,
}

impl FeedForward {
    /// Create a new feed-forward block.
    pub fn new(d_model: usize, d_ff: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            w_1: candle_nn::linear(d_model, d_ff, vb.pp("w_1"))?,
            w_2: candle_nn::linear(d_ff, d_model, vb.pp("w_2"))?,
            dropout: Dropout::new(dropout),
            d_model,
            d_ff,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor `(batch, len, d_model)`
    /// * `train` - Whether dropout is active
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.w_1.forward(x)?.relu()?;
        let hidden = self.dropout.forward(&hidden, train)?;
        Ok(self.w_2.forward(&hidden)?)
    }

    /// Model width.
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Inner width.
    pub fn d_ff(&self) -> usize {
        self.d_ff
    }
}
