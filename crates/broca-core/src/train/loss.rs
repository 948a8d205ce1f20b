//! Label-smoothed cross-entropy.
//!
//! The target distribution mixes the one-hot label with a uniform
//! distribution over the whole vocabulary:
//!
//! `q = (1 - eps) * onehot(label) + eps / V`
//!
//! so the per-position loss against generator log-probabilities `log p` is
//!
//! `-( (1 - eps) * log p[label] + eps / V * sum_v log p[v] )`
//!
//! Positions whose label is the pad id contribute nothing; the caller
//! divides the summed loss by the non-pad token count.

use crate::error::{BrocaError, Result};
use candle_core::{D, DType, Tensor};

/// Label-smoothed cross-entropy over flattened positions.
#[derive(Debug, Clone)]
pub struct LabelSmoothing {
    /// Mixing weight of the uniform distribution.
    smoothing: f64,
    /// Label id excluded from the loss.
    pad_id: u32,
}

impl LabelSmoothing {
    /// Create a new loss.
    pub fn new(smoothing: f64, pad_id: u32) -> Result<Self> {
        if !(0.0..1.0).contains(&smoothing) {
            return Err(BrocaError::InvalidConfig(format!(
                "label smoothing {} is outside [0, 1)",
                smoothing
            )));
        }
        Ok(Self { smoothing, pad_id })
    }

    /// Summed loss over all non-pad positions.
    ///
    /// # Arguments
    ///
    /// * `log_probs` - `(positions, vocab)` generator output
    /// * `labels` - `(positions,)` u32 label ids
    pub fn forward(&self, log_probs: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let (positions, vocab) = log_probs.dims2()?;
        if labels.dims() != [positions] {
            return Err(BrocaError::ShapeMismatch(format!(
                "{} labels for {} positions",
                labels.elem_count(),
                positions
            )));
        }
        let picked = log_probs
            .gather(&labels.unsqueeze(D::Minus1)?, D::Minus1)?
            .squeeze(D::Minus1)?;
        let total = log_probs.sum(D::Minus1)?;
        let per_position = ((picked * (1.0 - self.smoothing))?
            + (total * (self.smoothing / vocab as f64))?)?;
        let keep = labels.ne(self.pad_id)?.to_dtype(DType::F32)?;
        Ok((per_position * keep)?.sum_all()?.neg()?)
    }

    /// Mixing weight.
    pub fn smoothing(&self) -> f64 {
        self.smoothing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::ops::log_softmax;

    const PAD: u32 = 2;

    fn log_probs_from_logits<const M: usize>(logits: &[[f32; 4]; M]) -> Tensor {
        let t = Tensor::new(logits, &Device::Cpu).unwrap();
        log_softmax(&t, D::Minus1).unwrap()
    }

    #[test]
    fn loss_is_positive_for_imperfect_predictions() {
        let loss = LabelSmoothing::new(0.1, PAD).unwrap();
        let log_probs = log_probs_from_logits(&[[0.0, 0.0, 0.0, 0.0]]);
        let labels = Tensor::new(&[1u32], &Device::Cpu).unwrap();
        let value: f32 = loss
            .forward(&log_probs, &labels)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(value > 0.0);
    }

    #[test]
    fn pad_labels_contribute_nothing() {
        let loss = LabelSmoothing::new(0.1, PAD).unwrap();
        let log_probs = log_probs_from_logits(&[[3.0, -1.0, 0.5, 0.0], [0.1, 2.0, -0.3, 0.7]]);
        let labels = Tensor::new(&[PAD, PAD], &Device::Cpu).unwrap();
        let value: f32 = loss
            .forward(&log_probs, &labels)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn confident_correct_prediction_beats_uniform() {
        let loss = LabelSmoothing::new(0.1, PAD).unwrap();
        let labels = Tensor::new(&[0u32], &Device::Cpu).unwrap();
        let confident = log_probs_from_logits(&[[8.0, 0.0, 0.0, 0.0]]);
        let uniform = log_probs_from_logits(&[[0.0, 0.0, 0.0, 0.0]]);
        let l_confident: f32 = loss
            .forward(&confident, &labels)
            .unwrap()
            .to_scalar()
            .unwrap();
        let l_uniform: f32 = loss.forward(&uniform, &labels).unwrap().to_scalar().unwrap();
        assert!(l_confident < l_uniform);
    }

    #[test]
    fn zero_smoothing_matches_negative_log_likelihood() {
        let loss = LabelSmoothing::new(0.0, PAD).unwrap();
        let log_probs = log_probs_from_logits(&[[1.0, 2.0, 0.0, -1.0]]);
        let labels = Tensor::new(&[1u32], &Device::Cpu).unwrap();
        let value: f32 = loss
            .forward(&log_probs, &labels)
            .unwrap()
            .to_scalar()
            .unwrap();
        let expected: f32 = -log_probs
            .squeeze(0)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[1];
        assert!((value - expected).abs() < 1e-6);
    }

    #[test]
    fn label_count_mismatch_is_a_hard_failure() {
        let loss = LabelSmoothing::new(0.1, PAD).unwrap();
        let log_probs = log_probs_from_logits(&[[0.0, 0.0, 0.0, 0.0]]);
        let labels = Tensor::new(&[1u32, 3], &Device::Cpu).unwrap();
        assert!(matches!(
            loss.forward(&log_probs, &labels),
            Err(BrocaError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn invalid_smoothing_is_rejected() {
        assert!(LabelSmoothing::new(1.0, PAD).is_err());
        assert!(LabelSmoothing::new(-0.1, PAD).is_err());
    }
}
