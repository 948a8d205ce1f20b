//! Error types for Broca Core.

use thiserror::Error;

/// Result type alias for Broca operations.
pub type Result<T> = std::result::Result<T, BrocaError>;

/// Errors that can occur in Broca operations.
#[derive(Error, Debug)]
pub enum BrocaError {
    /// Invalid model or training configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Token id outside the vocabulary.
    #[error("unknown token id: {0}")]
    UnknownId(usize),

    /// Malformed training corpus line.
    #[error("corpus error: {0}")]
    Corpus(String),

    /// Shape or mask mismatch error.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}
