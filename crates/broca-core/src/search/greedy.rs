//! Greedy autoregressive decoding.
//!
//! The deterministic baseline strategy: at every step, decode the prefix
//! so far against the encoder memory and append the single
//! highest-probability next token. No sampling, no early stop on the
//! sequence-end token — the caller trims with
//! [`trim_at_eos`](crate::search::trim_at_eos).

use crate::error::{BrocaError, Result};
use crate::mask::causal_mask;
use crate::model::Translator;
use candle_core::{D, Tensor};

/// Decode one batch greedily.
///
/// Starts every sequence with `bos_id` and appends argmax ids until each
/// sequence holds exactly `max_len` ids (the start id included). Output is
/// `(batch, max_len)`, u32. Given identical parameters and input, two
/// invocations produce identical output.
///
/// # Arguments
///
/// * `src` - Source ids `(batch, src_len)`, u32
/// * `src_mask` - Source padding mask `(batch, 1, src_len)`
pub fn greedy_decode(
    model: &Translator,
    src: &Tensor,
    src_mask: &Tensor,
    max_len: usize,
    bos_id: u32,
) -> Result<Tensor> {
    if max_len == 0 {
        return Err(BrocaError::InvalidConfig("max_len must be non-zero".into()));
    }
    let (batch, _) = src.dims2()?;
    let device = src.device();
    let memory = model.encode(src, src_mask, false)?;
    let mut tgt = Tensor::full(bos_id, (batch, 1), device)?;
    for _ in 1..max_len {
        let len = tgt.dim(1)?;
        let tgt_mask = causal_mask(len, device)?;
        let out = model.decode(&memory, src_mask, &tgt, &tgt_mask, false)?;
        let last = out.narrow(1, len - 1, 1)?;
        let log_probs = model.generator().forward(&last)?;
        let next = log_probs.argmax(D::Minus1)?;
        tgt = Tensor::cat(&[&tgt, &next], 1)?;
    }
    Ok(tgt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::padding_mask;
    use crate::model::ModelConfig;
    use crate::vocab::{BOS_ID, PAD_ID};
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn create_test_model() -> Translator {
        let config = ModelConfig {
            src_vocab_size: 12,
            tgt_vocab_size: 12,
            d_model: 16,
            d_ff: 32,
            num_heads: 2,
            num_layers: 1,
            dropout: 0.1,
            max_position: 32,
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Translator::new(config, vb).unwrap()
    }

    #[test]
    fn output_has_exactly_max_len_ids() {
        let model = create_test_model();
        let src = Tensor::new(&[[BOS_ID, 4, 5, 1]], &Device::Cpu).unwrap();
        let src_mask = padding_mask(&src, PAD_ID).unwrap();
        let out = greedy_decode(&model, &src, &src_mask, 5, BOS_ID).unwrap();
        assert_eq!(out.dims(), &[1, 5]);
    }

    #[test]
    fn every_sequence_starts_with_bos() {
        let model = create_test_model();
        let src = Tensor::new(&[[BOS_ID, 4, 1], [BOS_ID, 5, 1]], &Device::Cpu).unwrap();
        let src_mask = padding_mask(&src, PAD_ID).unwrap();
        let out = greedy_decode(&model, &src, &src_mask, 4, BOS_ID).unwrap();
        let rows: Vec<Vec<u32>> = out.to_vec2().unwrap();
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row[0], BOS_ID);
            assert_eq!(row.len(), 4);
        }
    }

    #[test]
    fn decoding_is_deterministic() {
        let model = create_test_model();
        let src = Tensor::new(&[[BOS_ID, 4, 5, 6, 1]], &Device::Cpu).unwrap();
        let src_mask = padding_mask(&src, PAD_ID).unwrap();
        let a: Vec<Vec<u32>> = greedy_decode(&model, &src, &src_mask, 8, BOS_ID)
            .unwrap()
            .to_vec2()
            .unwrap();
        let b: Vec<Vec<u32>> = greedy_decode(&model, &src, &src_mask, 8, BOS_ID)
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn max_len_one_returns_only_bos() {
        let model = create_test_model();
        let src = Tensor::new(&[[BOS_ID, 4, 1]], &Device::Cpu).unwrap();
        let src_mask = padding_mask(&src, PAD_ID).unwrap();
        let out: Vec<Vec<u32>> = greedy_decode(&model, &src, &src_mask, 1, BOS_ID)
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(out, vec![vec![BOS_ID]]);
    }

    #[test]
    fn zero_max_len_is_a_config_error() {
        let model = create_test_model();
        let src = Tensor::new(&[[BOS_ID, 4, 1]], &Device::Cpu).unwrap();
        let src_mask = padding_mask(&src, PAD_ID).unwrap();
        assert!(greedy_decode(&model, &src, &src_mask, 0, BOS_ID).is_err());
    }
}
