//! Residual sublayer composition.
//!
//! Every attention and feed-forward block in the stacks is wrapped the
//! same way:
//!
//! `output = input + dropout(block(norm(input)))`
//!
//! Pre-normalization keeps activations bounded through many stacked
//! layers, which is what makes deep encoder/decoder stacks trainable.

use crate::error::Result;
use candle_core::Tensor;
use candle_nn::{layer_norm, Dropout, LayerNorm, LayerNormConfig, Module, VarBuilder};

/// Epsilon added to the normalization denominator.
pub(crate) const LAYER_NORM_EPS: f64 = 1e-6;

/// Build the layer normalization used throughout the stacks: learned scale
/// and shift over the feature dimension.
pub(crate) fn build_norm(d_model: usize, vb: VarBuilder) -> Result<LayerNorm> {
    let config = LayerNormConfig {
        eps: LAYER_NORM_EPS,
        remove_mean: true,
        affine: true,
    };
    Ok(layer_norm(d_model, config, vb)?)
}

/// Pre-norm residual wrapper around one attention or feed-forward block.
#[derive(Debug, Clone)]
pub struct SublayerConnection {
    /// Normalization applied before the wrapped block.
    norm: LayerNorm,
    /// Dropout on the block output, before the residual add.
    dropout: Dropout,
}

impl SublayerConnection {
    /// Create a new sublayer wrapper.
    pub fn new(d_model: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm: build_norm(d_model, vb.pp("norm"))?,
            dropout: Dropout::new(dropout),
        })
    }

    /// Apply `block` to the normalized input and add the residual.
    pub fn forward<F>(&self, x: &Tensor, train: bool, block: F) -> Result<Tensor>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        let normed = self.norm.forward(x)?;
        let out = block(&normed)?;
        let out = self.dropout.forward(&out, train)?;
        Ok((x + out)?)
    }
}
