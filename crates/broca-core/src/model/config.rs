//! Model configuration.

use crate::error::{BrocaError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a translation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Source vocabulary size.
    pub src_vocab_size: usize,
    /// Target vocabulary size.
    pub tgt_vocab_size: usize,
    /// Model width.
    pub d_model: usize,
    /// Feed-forward inner width.
    pub d_ff: usize,
    /// Number of attention heads.
    pub num_heads: usize,
    /// Number of encoder and decoder layers.
    pub num_layers: usize,
    /// Dropout probability.
    pub dropout: f32,
    /// Maximum sequence length for the positional encoding table.
    pub max_position: usize,
}

impl ModelConfig {
    /// Per-head width.
    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads
    }

    /// Check the configuration, surfacing errors at construction time.
    pub fn validate(&self) -> Result<()> {
        if self.d_model % self.num_heads != 0 {
            return Err(BrocaError::InvalidConfig(format!(
                "d_model {} is not divisible by num_heads {}",
                self.d_model, self.num_heads
            )));
        }
        for (name, value) in [
            ("src_vocab_size", self.src_vocab_size),
            ("tgt_vocab_size", self.tgt_vocab_size),
            ("d_model", self.d_model),
            ("d_ff", self.d_ff),
            ("num_heads", self.num_heads),
            ("num_layers", self.num_layers),
            ("max_position", self.max_position),
        ] {
            if value == 0 {
                return Err(BrocaError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(BrocaError::InvalidConfig(format!(
                "dropout {} is outside [0, 1)",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Load from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            src_vocab_size: 4,
            tgt_vocab_size: 4,
            d_model: 512,
            d_ff: 2048,
            num_heads: 8,
            num_layers: 6,
            dropout: 0.1,
            max_position: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_dim_is_derived() {
        let config = ModelConfig::default();
        assert_eq!(config.head_dim(), 64);
    }

    #[test]
    fn default_config_is_valid() {
        ModelConfig::default().validate().unwrap();
    }

    #[test]
    fn indivisible_heads_are_rejected() {
        let config = ModelConfig {
            d_model: 100,
            num_heads: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BrocaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_layers_are_rejected() {
        let config = ModelConfig {
            num_layers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn dropout_out_of_range_is_rejected() {
        let config = ModelConfig {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
