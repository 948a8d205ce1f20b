//! Teacher-forced training batches.
//!
//! A [`Batch`] pairs padded source/target id tensors with their visibility
//! masks and the shifted target views used for teacher forcing: the
//! decoder reads `tgt[:, :-1]` and is scored against `tgt[:, 1:]`, so the
//! label at position `i` is the correct prediction given decoder input
//! positions `<= i`. Batches are immutable once constructed and discarded
//! after the step that used them.

use crate::error::{BrocaError, Result};
use crate::mask;
use crate::vocab::{Vocab, PAD};
use candle_core::{DType, Device, Tensor};

/// One teacher-forced batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Source ids `(batch, src_len)`.
    pub src: Tensor,
    /// Source padding mask `(batch, 1, src_len)`.
    pub src_mask: Tensor,
    /// Decoder input view `(batch, tgt_len - 1)`: all but the last token.
    pub tgt_in: Tensor,
    /// Label view `(batch, tgt_len - 1)`: all but the first token.
    pub tgt_out: Tensor,
    /// Decoder mask `(batch, tgt_len - 1, tgt_len - 1)`: padding AND causal.
    pub tgt_mask: Tensor,
    /// Number of non-pad labels, the per-token loss normalizer.
    pub ntokens: usize,
}

impl Batch {
    /// Build a batch from already padded id tensors.
    ///
    /// # Arguments
    ///
    /// * `src` - Source ids `(batch, src_len)`, u32
    /// * `tgt` - Target ids `(batch, tgt_len)`, u32, `tgt_len >= 2`
    /// * `pad_id` - Padding id shared by both sides
    pub fn new(src: Tensor, tgt: Tensor, pad_id: u32) -> Result<Self> {
        let src_mask = mask::padding_mask(&src, pad_id)?;
        let tgt_len = tgt.dim(1)?;
        if tgt_len < 2 {
            return Err(BrocaError::ShapeMismatch(format!(
                "target length {} leaves nothing to predict after shifting",
                tgt_len
            )));
        }
        let tgt_in = tgt.narrow(1, 0, tgt_len - 1)?;
        let tgt_out = tgt.narrow(1, 1, tgt_len - 1)?;
        let tgt_mask = mask::target_mask(&tgt_in, pad_id)?;
        let ntokens = tgt_out
            .ne(pad_id)?
            .to_dtype(DType::U32)?
            .sum_all()?
            .to_scalar::<u32>()? as usize;
        Ok(Self {
            src,
            src_mask,
            tgt_in,
            tgt_out,
            tgt_mask,
            ntokens,
        })
    }

    /// Numberize one padded group of sentence pairs into a batch.
    ///
    /// Every pair in the group must already share one source length and
    /// one target length (see [`group_by_length`]).
    pub fn from_pairs(
        pairs: &[(Vec<String>, Vec<String>)],
        src_vocab: &Vocab,
        tgt_vocab: &Vocab,
        pad_id: u32,
        device: &Device,
    ) -> Result<Self> {
        if pairs.is_empty() {
            return Err(BrocaError::ShapeMismatch("empty batch group".into()));
        }
        let src_len = pairs[0].0.len();
        let tgt_len = pairs[0].1.len();
        let mut src_ids = Vec::with_capacity(pairs.len() * src_len);
        let mut tgt_ids = Vec::with_capacity(pairs.len() * tgt_len);
        for (src_words, tgt_words) in pairs {
            if src_words.len() != src_len || tgt_words.len() != tgt_len {
                return Err(BrocaError::ShapeMismatch(format!(
                    "group not padded to a common length: ({}, {}) vs ({}, {})",
                    src_words.len(),
                    tgt_words.len(),
                    src_len,
                    tgt_len
                )));
            }
            src_ids.extend(src_vocab.numberize(src_words));
            tgt_ids.extend(tgt_vocab.numberize(tgt_words));
        }
        let src = Tensor::from_vec(src_ids, (pairs.len(), src_len), device)?;
        let tgt = Tensor::from_vec(tgt_ids, (pairs.len(), tgt_len), device)?;
        Self::new(src, tgt, pad_id)
    }

    /// Number of sequences in the batch.
    pub fn size(&self) -> Result<usize> {
        Ok(self.src.dim(0)?)
    }
}

/// Group variable-length pairs into fixed-size, length-homogeneous groups.
///
/// Pairs are sorted by source length, chunked into groups of `batch_size`
/// (a trailing remainder is dropped, never padded into a partial batch),
/// and padded within each group to the group's maximum source and target
/// lengths. Within-group padding wastes far less computation than padding
/// the whole corpus to one global maximum.
pub fn group_by_length(
    mut pairs: Vec<(Vec<String>, Vec<String>)>,
    batch_size: usize,
) -> Result<Vec<Vec<(Vec<String>, Vec<String>)>>> {
    if batch_size == 0 {
        return Err(BrocaError::InvalidConfig("batch_size must be non-zero".into()));
    }
    pairs.sort_by_key(|(src, _)| src.len());
    let mut groups = Vec::with_capacity(pairs.len() / batch_size);
    for chunk in pairs.chunks_exact(batch_size) {
        let mut group = chunk.to_vec();
        let src_max = group.iter().map(|(s, _)| s.len()).max().unwrap_or(0);
        let tgt_max = group.iter().map(|(_, t)| t.len()).max().unwrap_or(0);
        for (src_words, tgt_words) in &mut group {
            src_words.resize(src_max, PAD.to_string());
            tgt_words.resize(tgt_max, PAD.to_string());
        }
        groups.push(group);
    }
    Ok(groups)
}
