//! Token embedding and sinusoidal positional encoding.
//!
//! Token embeddings are scaled by `sqrt(d_model)` before the positional
//! signal is added, so the embedding magnitude does not drown in the
//! position signal at common model widths.
//!
//! # Formula
//!
//! For position `p` and channel pair `(2k, 2k + 1)`:
//!
//! `penc[p, 2k] = sin(p / 10000^(2k/d))`
//! `penc[p, 2k+1] = cos(p / 10000^(2k/d))`
//!
//! The table is fixed (not learned), gives every position a unique,
//! smoothly varying signature, and extends to sequence lengths beyond
//! those seen in training.
//!
//! # Reference
//!
//! [Attention Is All You Need](https://arxiv.org/abs/1706.03762)

use crate::error::{BrocaError, Result};
use candle_core::{Device, Tensor};
use candle_nn::{Dropout, Embedding, Module, VarBuilder};

/// Token embedding scaled by `sqrt(d_model)`.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    /// Embedding table: [vocab_size, d_model].
    emb: Embedding,
    /// Model width.
    d_model: usize,
}

impl TokenEmbedding {
    /// Create a new token embedding.
    pub fn new(vocab_size: usize, d_model: usize, vb: VarBuilder) -> Result<Self> {
        let emb = candle_nn::embedding(vocab_size, d_model, vb)?;
        Ok(Self { emb, d_model })
    }

    /// Embed token ids.
    ///
    /// # Arguments
    ///
    /// * `ids` - Token ids `(batch, len)`, u32
    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let embedded = self.emb.forward(ids)?;
        Ok((embedded * (self.d_model as f64).sqrt())?)
    }

    /// Model width.
    pub fn d_model(&self) -> usize {
        self.d_model
    }
}

/// Fixed sinusoidal positional encoding with post-sum dropout.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    /// Precomputed table: [1, max_position, d_model]. Not a parameter.
    penc: Tensor,
    /// Dropout applied after the additive combination, training only.
    dropout: Dropout,
}

impl PositionalEncoding {
    /// Precompute the encoding table.
    pub fn new(d_model: usize, max_position: usize, dropout: f32, device: &Device) -> Result<Self> {
        let mut data = vec![0f32; max_position * d_model];
        for pos in 0..max_position {
            for k in (0..d_model).step_by(2) {
                let div_term = (-(k as f64) * (10_000f64).ln() / d_model as f64).exp();
                let angle = pos as f64 * div_term;
                data[pos * d_model + k] = angle.sin() as f32;
                if k + 1 < d_model {
                    data[pos * d_model + k + 1] = angle.cos() as f32;
                }
            }
        }
        let penc = Tensor::from_vec(data, (1, max_position, d_model), device)?;
        Ok(Self {
            penc,
            dropout: Dropout::new(dropout),
        })
    }

    /// Add the positional signal to an embedded sequence.
    ///
    /// # Arguments
    ///
    /// * `x` - Embedded tokens `(batch, len, d_model)`
    /// * `train` - Whether dropout is active
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (_, len, _) = x.dims3()?;
        let max_position = self.penc.dim(1)?;
        if len > max_position {
            return Err(BrocaError::ShapeMismatch(format!(
                "sequence length {} exceeds the positional table length {}",
                len, max_position
            )));
        }
        let x = x.broadcast_add(&self.penc.narrow(1, 0, len)?)?;
        Ok(self.dropout.forward(&x, train)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn create_test_embedding(vocab: usize, d_model: usize) -> TokenEmbedding {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        TokenEmbedding::new(vocab, d_model, vb).unwrap()
    }

    #[test]
    fn embedding_output_shape() {
        let emb = create_test_embedding(10, 16);
        let ids = Tensor::new(&[[1u32, 2, 3]], &Device::Cpu).unwrap();
        let out = emb.forward(&ids).unwrap();
        assert_eq!(out.dims(), &[1, 3, 16]);
    }

    #[test]
    fn embedding_scales_by_sqrt_d_model() {
        let emb = create_test_embedding(10, 16);
        let ids = Tensor::new(&[[5u32]], &Device::Cpu).unwrap();
        let scaled: Vec<f32> = emb.forward(&ids).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let raw: Vec<f32> = emb
            .emb
            .forward(&ids)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for (s, r) in scaled.iter().zip(raw.iter()) {
            assert!((s - r * 4.0).abs() < 1e-5);
        }
    }

    #[test]
    fn positional_encoding_first_position() {
        let penc = PositionalEncoding::new(8, 16, 0.0, &Device::Cpu).unwrap();
        let x = Tensor::zeros((1, 1, 8), DType::F32, &Device::Cpu).unwrap();
        let out: Vec<f32> = penc
            .forward(&x, false)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        // At position 0 every sine channel is 0 and every cosine channel 1.
        for (i, v) in out.iter().enumerate() {
            let expected = if i % 2 == 0 { 0.0 } else { 1.0 };
            assert!((v - expected).abs() < 1e-6, "channel {}", i);
        }
    }

    #[test]
    fn positional_encoding_matches_formula() {
        let d_model = 6;
        let penc = PositionalEncoding::new(d_model, 16, 0.0, &Device::Cpu).unwrap();
        let x = Tensor::zeros((1, 3, d_model), DType::F32, &Device::Cpu).unwrap();
        let out: Vec<Vec<f32>> = penc
            .forward(&x, false)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec2()
            .unwrap();
        for (pos, row) in out.iter().enumerate() {
            for k in (0..d_model).step_by(2) {
                let angle = pos as f64 / 10_000f64.powf(k as f64 / d_model as f64);
                assert!((row[k] as f64 - angle.sin()).abs() < 1e-5);
                if k + 1 < d_model {
                    assert!((row[k + 1] as f64 - angle.cos()).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn positions_have_distinct_signatures() {
        let penc = PositionalEncoding::new(16, 32, 0.0, &Device::Cpu).unwrap();
        let x = Tensor::zeros((1, 32, 16), DType::F32, &Device::Cpu).unwrap();
        let rows: Vec<Vec<f32>> = penc
            .forward(&x, false)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec2()
            .unwrap();
        for i in 0..rows.len() {
            for j in (i + 1)..rows.len() {
                let diff: f32 = rows[i]
                    .iter()
                    .zip(rows[j].iter())
                    .map(|(a, b)| (a - b).abs())
                    .sum();
                assert!(diff > 1e-3, "positions {} and {} collide", i, j);
            }
        }
    }

    #[test]
    fn sequence_longer_than_table_is_an_error() {
        let penc = PositionalEncoding::new(8, 4, 0.0, &Device::Cpu).unwrap();
        let x = Tensor::zeros((1, 5, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(penc.forward(&x, false).is_err());
    }
}
