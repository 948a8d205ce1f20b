//! Beam search decoding.
//!
//! The production decoding strategy: a fixed-width set of partial
//! hypotheses is expanded in lockstep, pruned by length-normalized score,
//! and the best surviving sequence is returned per source example.
//!
//! # Algorithm
//!
//! 1. Start with one hypothesis holding the sequence-start id
//! 2. For each step:
//!    a. Decode all unfinished hypotheses against the encoder memory
//!    b. Expand each with its `beam_width` best next tokens
//!    c. Keep the top `beam_width` of finished + expanded hypotheses
//! 3. Stop when every kept hypothesis has emitted the sequence-end id,
//!    or the length limit is reached
//!
//! # Scoring
//!
//! Hypotheses are ranked by `score / ((5 + len) / 6)^alpha`, the Wu et al.
//! length penalty; `alpha = 0` disables normalization. The ranking sort is
//! stable, so ties resolve toward the hypothesis expanded from the
//! earlier-ranked parent and, within one parent, toward the lower token
//! id.

use crate::error::{BrocaError, Result};
use crate::mask::causal_mask;
use crate::model::Translator;
use crate::vocab::{BOS_ID, EOS_ID};
use candle_core::Tensor;
use std::cmp::Ordering;

/// Configuration for beam search.
#[derive(Debug, Clone)]
pub struct BeamConfig {
    /// Number of hypotheses kept at each step.
    pub beam_width: usize,
    /// Maximum sequence length, the start id included.
    pub max_len: usize,
    /// Length normalization alpha (0 = no normalization).
    pub length_alpha: f64,
    /// Sequence-start id.
    pub bos_id: u32,
    /// Sequence-end id freezing a hypothesis.
    pub eos_id: u32,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            beam_width: 4,
            max_len: 64,
            length_alpha: 0.6,
            bos_id: BOS_ID,
            eos_id: EOS_ID,
        }
    }
}

/// A partial decoding hypothesis.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    /// Token ids so far, starting with the sequence-start id.
    pub tokens: Vec<u32>,
    /// Sum of token log-probabilities.
    pub score: f64,
    /// Whether the hypothesis has emitted the sequence-end id.
    pub finished: bool,
}

impl Hypothesis {
    /// Length-normalized score: `score / ((5 + len) / 6)^alpha`.
    pub fn normalized_score(&self, alpha: f64) -> f64 {
        if alpha == 0.0 || self.tokens.is_empty() {
            self.score
        } else {
            let penalty = ((5.0 + self.tokens.len() as f64) / 6.0).powf(alpha);
            self.score / penalty
        }
    }
}

/// Decode every source example in a batch with beam search.
///
/// Takes the encoder memory rather than raw source ids so one encode pass
/// can serve repeated searches.
///
/// # Arguments
///
/// * `memory` - Encoder output `(batch, src_len, d_model)`
/// * `src_mask` - Source padding mask `(batch, 1, src_len)`
///
/// # Returns
///
/// One id sequence per source example, each starting with the
/// sequence-start id and ending with the sequence-end id unless the length
/// limit cut it off.
pub fn beam_search(
    model: &Translator,
    memory: &Tensor,
    src_mask: &Tensor,
    config: &BeamConfig,
) -> Result<Vec<Vec<u32>>> {
    if config.beam_width == 0 {
        return Err(BrocaError::InvalidConfig("beam_width must be non-zero".into()));
    }
    if config.max_len < 2 {
        return Err(BrocaError::InvalidConfig(
            "max_len must leave room for at least one generated token".into(),
        ));
    }
    let (batch, _, _) = memory.dims3()?;
    let mut sequences = Vec::with_capacity(batch);
    for i in 0..batch {
        let memory_i = memory.narrow(0, i, 1)?;
        let src_mask_i = src_mask.narrow(0, i, 1)?;
        sequences.push(search_one(model, &memory_i, &src_mask_i, config)?);
    }
    Ok(sequences)
}

/// Search a single example. `memory` is `(1, src_len, d_model)`.
fn search_one(
    model: &Translator,
    memory: &Tensor,
    src_mask: &Tensor,
    config: &BeamConfig,
) -> Result<Vec<u32>> {
    let device = memory.device();
    let mut beams = vec![Hypothesis {
        tokens: vec![config.bos_id],
        score: 0.0,
        finished: false,
    }];

    loop {
        let active: Vec<usize> = (0..beams.len()).filter(|&i| !beams[i].finished).collect();
        if active.is_empty() {
            break;
        }
        // Unfinished hypotheses grow in lockstep, so they share one length.
        let cur_len = beams[active[0]].tokens.len();
        if cur_len >= config.max_len {
            break;
        }

        let mut ids = Vec::with_capacity(active.len() * cur_len);
        for &i in &active {
            ids.extend_from_slice(&beams[i].tokens);
        }
        let tgt = Tensor::from_vec(ids, (active.len(), cur_len), device)?;
        let tgt_mask = causal_mask(cur_len, device)?;
        let memory_rows = memory.repeat((active.len(), 1, 1))?;
        let mask_rows = src_mask.repeat((active.len(), 1, 1))?;

        let out = model.decode(&memory_rows, &mask_rows, &tgt, &tgt_mask, false)?;
        let last = out.narrow(1, cur_len - 1, 1)?;
        let log_probs = model.generator().forward(&last)?.squeeze(1)?;
        let rows: Vec<Vec<f32>> = log_probs.to_vec2()?;

        // Finished hypotheses compete unchanged against the expansions.
        let mut candidates: Vec<Hypothesis> =
            beams.iter().filter(|h| h.finished).cloned().collect();
        for (row, &i) in rows.iter().zip(active.iter()) {
            let parent = &beams[i];
            for (token, log_prob) in top_k(row, config.beam_width) {
                let mut tokens = parent.tokens.clone();
                tokens.push(token);
                candidates.push(Hypothesis {
                    finished: token == config.eos_id,
                    score: parent.score + log_prob as f64,
                    tokens,
                });
            }
        }

        sort_by_normalized_score(&mut candidates, config.length_alpha);
        candidates.truncate(config.beam_width);
        beams = candidates;
    }

    sort_by_normalized_score(&mut beams, config.length_alpha);
    Ok(beams.swap_remove(0).tokens)
}

/// Indices and values of the `k` largest entries, ties toward lower ids.
fn top_k(row: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = row.iter().enumerate().map(|(i, &v)| (i as u32, v)).collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
    indexed.truncate(k);
    indexed
}

/// Stable descending sort by normalized score.
fn sort_by_normalized_score(hypotheses: &mut [Hypothesis], alpha: f64) {
    hypotheses.sort_by(|a, b| {
        b.normalized_score(alpha)
            .partial_cmp(&a.normalized_score(alpha))
            .unwrap_or(Ordering::Equal)
    });
}
