//! # Broca
//!
//! Neural machine translation engine: an encoder-decoder attention model
//! with teacher-forced training, plateau-scheduled learning rates, and
//! greedy or beam-search decoding.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use broca::prelude::*;
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut engine = Engine::builder()
//!         .source_vocab(Vocab::from_reader(BufReader::new(File::open("vocab.de")?))?)
//!         .target_vocab(Vocab::from_reader(BufReader::new(File::open("vocab.en")?))?)
//!         .build()?;
//!
//!     let corpus = BufReader::new(File::open("train.bpe.de-en")?);
//!     engine.train(corpus, |report| {
//!         println!(
//!             "[{}] Train Loss: {} | Valid Loss: {} | Learning Rate: {} | Elapsed Time: {:?}",
//!             report.epoch, report.train_loss, report.valid_loss,
//!             report.learning_rate, report.elapsed,
//!         );
//!     })?;
//!
//!     let translation = engine.translate(&["ich", "bin", "bereit"])?;
//!     println!("{}", translation.join(" "));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use broca_core::*;

mod engine;

pub use engine::{Engine, EngineBuilder, EngineConfig, EpochReport};

/// Commonly used types.
pub mod prelude {
    pub use crate::engine::{Engine, EngineBuilder, EngineConfig, EpochReport};
    pub use broca_core::{
        batch::{group_by_length, Batch},
        error::{BrocaError, Result},
        model::{ModelConfig, Translator},
        search::{beam_search, greedy_decode, trim_at_eos, BeamConfig},
        vocab::Vocab,
    };
}
