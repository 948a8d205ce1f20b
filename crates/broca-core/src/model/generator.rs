//! Output projection to vocabulary log-probabilities.

use crate::error::Result;
use candle_core::{D, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Linear projection to the target vocabulary followed by log-softmax.
///
/// The same head serves both uses: per-token log-probabilities for the
/// label-smoothed training loss and next-token distributions at decode
/// time.
#[derive(Debug, Clone)]
pub struct Generator {
    /// Projection: d_model -> tgt_vocab_size.
    proj: Linear,
    /// Target vocabulary size.
    vocab_size: usize,
}

impl Generator {
    /// Create a new generator head.
    pub fn new(d_model: usize, vocab_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            proj: candle_nn::linear(d_model, vocab_size, vb.pp("proj"))?,
            vocab_size,
        })
    }

    /// Map decoder states `(..., d_model)` to log-probabilities
    /// `(..., vocab_size)`, normalized over the vocabulary dimension.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let logits = self.proj.forward(x)?;
        Ok(candle_nn::ops::log_softmax(&logits, D::Minus1)?)
    }

    /// Target vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn create_test_generator(d_model: usize, vocab: usize) -> Generator {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Generator::new(d_model, vocab, vb).unwrap()
    }

    #[test]
    fn generator_output_shape() {
        let generator = create_test_generator(16, 11);
        let x = Tensor::randn(0.0f32, 1.0, &[2, 5, 16], &Device::Cpu).unwrap();
        let out = generator.forward(&x).unwrap();
        assert_eq!(out.dims(), &[2, 5, 11]);
        assert_eq!(generator.vocab_size(), 11);
    }

    #[test]
    fn probabilities_sum_to_one_per_position() {
        let generator = create_test_generator(16, 11);
        let x = Tensor::randn(0.0f32, 1.0, &[2, 5, 16], &Device::Cpu).unwrap();
        let probs = generator.forward(&x).unwrap().exp().unwrap();
        let sums: Vec<f32> = probs
            .sum(candle_core::D::Minus1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5, "position sums to {}", sum);
        }
    }

    #[test]
    fn log_probabilities_are_non_positive() {
        let generator = create_test_generator(8, 5);
        let x = Tensor::randn(0.0f32, 1.0, &[1, 3, 8], &Device::Cpu).unwrap();
        let vals: Vec<f32> = generator
            .forward(&x)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for v in vals {
            assert!(v <= 0.0);
        }
    }
}
