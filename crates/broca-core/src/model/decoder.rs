//! Decoder stack.
//!
//! Each layer runs three sublayers in order: masked self-attention over
//! the target prefix, cross-attention where the decoder state queries the
//! encoder memory, and a feed-forward block. The self-attention mask is
//! the padding/causal conjunction; cross-attention reuses the source
//! padding mask so pad positions in the memory are invisible.

use super::attention::MultiHeadAttention;
use super::config::ModelConfig;
use super::feedforward::FeedForward;
use super::sublayer::{build_norm, SublayerConnection};
use crate::error::Result;
use candle_core::Tensor;
use candle_nn::{LayerNorm, Module, VarBuilder};

/// A single decoder layer.
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    /// Masked self-attention over the target prefix.
    self_attn: MultiHeadAttention,
    /// Cross-attention into the encoder memory.
    cross_attn: MultiHeadAttention,
    /// Position-wise feed-forward block.
    feed_forward: FeedForward,
    /// Residual wrappers, one per block.
    sublayers: [SublayerConnection; 3],
    /// Layer index (for debugging).
    layer_idx: usize,
}

impl DecoderLayer {
    /// Create a new decoder layer.
    pub fn new(config: &ModelConfig, layer_idx: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: MultiHeadAttention::new(
                config.d_model,
                config.num_heads,
                config.dropout,
                vb.pp("self_attn"),
            )?,
            cross_attn: MultiHeadAttention::new(
                config.d_model,
                config.num_heads,
                config.dropout,
                vb.pp("cross_attn"),
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
                SublayerConnection::new(config.d_model, config.dropout, vb.pp("sublayer_2"))?,
            ],
            layer_idx,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Embedded target prefix `(batch, tgt_len, d_model)`
    /// * `memory` - Encoder output `(batch, src_len, d_model)`
    /// * `src_mask` - Source padding mask `(batch, 1, src_len)`
    /// * `tgt_mask` - Target padding/causal mask `(batch|1, tgt_len, tgt_len)`
    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let x = self.sublayers[0].forward(x, train, |x| {
            let (out, _) = self.self_attn.forward(x, x, x, Some(tgt_mask), train)?;
            Ok(out)
        })?;
        let x = self.sublayers[1].forward(&x, train, |x| {
            let (out, _) = self
                .cross_attn
                .forward(x, memory, memory, Some(src_mask), train)?;
            Ok(out)
        })?;
        self.sublayers[2].forward(&x, train, |x| self.feed_forward.forward(x, train))
    }

    /// Layer index.
    pub fn layer_idx(&self) -> usize {
        self.layer_idx
    }
}

/// Decoder: N identical, independently parameterized layers plus a final
/// normalization.
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Ordered layer stack.
    layers: Vec<DecoderLayer>,
    /// Final normalization after the last layer.
    norm: LayerNorm,
}

impl Decoder {
    /// Create a new decoder stack.
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(DecoderLayer::new(config, i, vb.pp(format!("layer_{i}")))?);
        }
        Ok(Self {
            layers,
            norm: build_norm(config.d_model, vb.pp("norm"))?,
        })
    }

    /// Run the stack over an embedded target prefix.
    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let mut x = x.clone();
        for layer in &self.layers {
            x = layer.forward(&x, memory, src_mask, tgt_mask, train)?;
        }
        Ok(self.norm.forward(&x)?)
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{causal_mask, padding_mask};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn test_config() -> ModelConfig {
        ModelConfig {
            src_vocab_size: 10,
            tgt_vocab_size: 10,
            d_model: 16,
            d_ff: 32,
            num_heads: 2,
            num_layers: 2,
            dropout: 0.1,
            max_position: 32,
        }
    }

    fn create_test_decoder() -> Decoder {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Decoder::new(&test_config(), vb).unwrap()
    }

    #[test]
    fn decoder_builds_requested_layers() {
        let decoder = create_test_decoder();
        assert_eq!(decoder.num_layers(), 2);
    }

    #[test]
    fn decoder_preserves_target_shape() {
        let decoder = create_test_decoder();
        let x = Tensor::randn(0.0f32, 1.0, &[2, 4, 16], &Device::Cpu).unwrap();
        let memory = Tensor::randn(0.0f32, 1.0, &[2, 7, 16], &Device::Cpu).unwrap();
        let src_ids = Tensor::new(
            &[[0u32, 4, 5, 6, 7, 1, 2], [0, 4, 5, 1, 2, 2, 2]],
            &Device::Cpu,
        )
        .unwrap();
        let src_mask = padding_mask(&src_ids, 2).unwrap();
        let tgt_mask = causal_mask(4, &Device::Cpu).unwrap();
        let out = decoder
            .forward(&x, &memory, &src_mask, &tgt_mask, false)
            .unwrap();
        assert_eq!(out.dims(), &[2, 4, 16]);
    }
}
