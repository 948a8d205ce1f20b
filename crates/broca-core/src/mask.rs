//! Attention visibility masks.
//!
//! Masks are `u8` tensors where 1 marks a position that may be attended to
//! and 0 a position that must not be. Padding must never be attended to
//! (it corrupts the weighted averages) and future target positions must
//! never be visible during training (they break the autoregressive
//! factorization), so the decoder mask is the conjunction of both
//! conditions. Attention turns a 0 into a `-inf` score before the softmax,
//! never after.

use crate::error::Result;
use candle_core::{DType, Device, Tensor};

/// Mask of non-pad positions: `(batch, 1, len)`, 1 where token != pad.
///
/// The middle dimension broadcasts over query positions, so every query in
/// the sequence sees the same set of visible keys.
pub fn padding_mask(ids: &Tensor, pad_id: u32) -> Result<Tensor> {
    let mask = ids.ne(pad_id)?;
    Ok(mask.unsqueeze(1)?)
}

/// Causal mask: `(1, len, len)`, 1 at `(i, j)` iff `j <= i`.
pub fn causal_mask(len: usize, device: &Device) -> Result<Tensor> {
    let mask = Tensor::tril2(len, DType::U8, device)?;
    Ok(mask.unsqueeze(0)?)
}

/// Decoder self-attention mask: padding mask AND causal mask,
/// `(batch, len, len)`.
pub fn target_mask(tgt: &Tensor, pad_id: u32) -> Result<Tensor> {
    let padding = padding_mask(tgt, pad_id)?;
    let causal = causal_mask(tgt.dim(1)?, tgt.device())?;
    Ok(padding.broadcast_mul(&causal)?)
}
