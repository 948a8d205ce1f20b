//! Teacher-forced training and evaluation loops.
//!
//! One epoch walks its batches strictly in order: forward pass, generator
//! log-probabilities, label-smoothed loss; in training mode the optimizer
//! collaborator then clears prior gradients, backpropagates and applies
//! one step. The reported figure is the summed loss divided by the number
//! of non-pad target tokens — mean loss per token.

mod loss;
mod scheduler;

pub use loss::LabelSmoothing;
pub use scheduler::{PlateauConfig, ReduceOnPlateau};

use crate::batch::Batch;
use crate::error::{BrocaError, Result};
use crate::model::Translator;
use candle_nn::Optimizer;

/// Run one training epoch, updating parameters batch by batch.
pub fn train_epoch<O: Optimizer>(
    model: &Translator,
    batches: &[Batch],
    loss: &LabelSmoothing,
    optimizer: &mut O,
) -> Result<f32> {
    run_epoch(model, batches, loss, Some(optimizer))
}

/// Evaluate without touching parameters or dropout.
pub fn evaluate(model: &Translator, batches: &[Batch], loss: &LabelSmoothing) -> Result<f32> {
    run_epoch(model, batches, loss, None::<&mut candle_nn::AdamW>)
}

fn run_epoch<O: Optimizer>(
    model: &Translator,
    batches: &[Batch],
    loss: &LabelSmoothing,
    mut optimizer: Option<&mut O>,
) -> Result<f32> {
    let train = optimizer.is_some();
    let mut total_loss = 0f64;
    let mut total_tokens = 0usize;
    for batch in batches {
        if batch.ntokens == 0 {
            continue;
        }
        let out = model.forward(&batch.src, &batch.tgt_in, &batch.src_mask, &batch.tgt_mask, train)?;
        let log_probs = model.generator().forward(&out)?;
        let (b, l, v) = log_probs.dims3()?;
        let flat = log_probs.reshape((b * l, v))?;
        let labels = batch.tgt_out.reshape(b * l)?;
        let loss_sum = loss.forward(&flat, &labels)?;
        if let Some(opt) = optimizer.as_deref_mut() {
            // Normalize by token count so the gradient scale does not
            // depend on how much padding the batch carries.
            let loss_mean = (&loss_sum / batch.ntokens as f64)?;
            opt.backward_step(&loss_mean)?;
        }
        total_loss += loss_sum.to_scalar::<f32>()? as f64;
        total_tokens += batch.ntokens;
    }
    if total_tokens == 0 {
        return Err(BrocaError::InvalidConfig(
            "epoch contains no non-pad target tokens".into(),
        ));
    }
    Ok((total_loss / total_tokens as f64) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelConfig;
    use crate::vocab::PAD_ID;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{AdamW, ParamsAdamW, VarBuilder, VarMap};

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            src_vocab_size: 10,
            tgt_vocab_size: 10,
            d_model: 16,
            d_ff: 32,
            num_heads: 2,
            num_layers: 1,
            dropout: 0.1,
            max_position: 16,
        }
    }

    fn create_test_setup() -> (Translator, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Translator::new(tiny_config(), vb).unwrap();
        (model, varmap)
    }

    fn create_test_batches() -> Vec<Batch> {
        let src = Tensor::new(&[[0u32, 4, 5, 1], [0, 6, 1, PAD_ID]], &Device::Cpu).unwrap();
        let tgt = Tensor::new(&[[0u32, 5, 4, 1], [0, 6, 1, PAD_ID]], &Device::Cpu).unwrap();
        vec![Batch::new(src, tgt, PAD_ID).unwrap()]
    }

    #[test]
    fn evaluation_reports_finite_mean_loss() {
        let (model, _varmap) = create_test_setup();
        let batches = create_test_batches();
        let loss = LabelSmoothing::new(0.1, PAD_ID).unwrap();
        let value = evaluate(&model, &batches, &loss).unwrap();
        assert!(value.is_finite());
        assert!(value > 0.0);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let (model, _varmap) = create_test_setup();
        let batches = create_test_batches();
        let loss = LabelSmoothing::new(0.1, PAD_ID).unwrap();
        let a = evaluate(&model, &batches, &loss).unwrap();
        let b = evaluate(&model, &batches, &loss).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn training_step_changes_parameters() {
        let (model, varmap) = create_test_setup();
        let batches = create_test_batches();
        let loss = LabelSmoothing::new(0.1, PAD_ID).unwrap();
        let before = evaluate(&model, &batches, &loss).unwrap();
        let mut optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: 1e-2,
                ..Default::default()
            },
        )
        .unwrap();
        train_epoch(&model, &batches, &loss, &mut optimizer).unwrap();
        let after = evaluate(&model, &batches, &loss).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn empty_epoch_is_an_error() {
        let (model, _varmap) = create_test_setup();
        let loss = LabelSmoothing::new(0.1, PAD_ID).unwrap();
        assert!(evaluate(&model, &[], &loss).is_err());
    }
}
