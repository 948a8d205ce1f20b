//! # Broca Core
//!
//! Encoder-decoder attention core for neural machine translation.
//!
//! This crate provides:
//! - **Vocabulary** with reserved sequence markers and dense ids
//! - **Masking** that keeps padding and future tokens out of attention
//! - **Transformer model**: embeddings, encoder/decoder stacks, generator
//! - **Teacher-forced batching** with length-grouped padding
//! - **Training loop** with label smoothing and a plateau LR schedule
//! - **Decoding**: greedy baseline and beam search
//!
//! Tokenization, corpus-level metrics and the checkpoint container format
//! are external collaborators.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod batch;
pub mod error;
pub mod mask;
pub mod model;
pub mod search;
pub mod train;
pub mod vocab;

pub use error::{BrocaError, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::batch::{group_by_length, Batch};
    pub use crate::error::{BrocaError, Result};
    pub use crate::model::{ModelConfig, Translator};
    pub use crate::search::{beam_search, greedy_decode, trim_at_eos, BeamConfig};
    pub use crate::train::{LabelSmoothing, PlateauConfig, ReduceOnPlateau};
    pub use crate::vocab::Vocab;
}
