//! Encoder-decoder translation model.
//!
//! Composes the pieces into the three operations the rest of the system
//! uses:
//! - `encode`: source ids -> encoder memory
//! - `decode`: target prefix + memory -> decoder states
//! - `forward`: both, for teacher-forced training
//!
//! Parameters are created through a [`candle_nn::VarBuilder`], so they
//! live in a caller-owned `VarMap` for the optimizer and for
//! serialization.

mod attention;
mod config;
mod decoder;
mod embedding;
mod encoder;
mod feedforward;
mod generator;
mod sublayer;

pub use attention::MultiHeadAttention;
pub use config::ModelConfig;
pub use decoder::{Decoder, DecoderLayer};
pub use embedding::{PositionalEncoding, TokenEmbedding};
pub use encoder::{Encoder, EncoderLayer};
pub use feedforward::FeedForward;
pub use generator::Generator;
pub use sublayer::SublayerConnection;

use crate::error::Result;
use candle_core::Tensor;
use candle_nn::VarBuilder;

/// The full sequence-to-sequence translation model.
pub struct Translator {
    /// Model configuration.
    config: ModelConfig,
    /// Source token embedding.
    src_embed: TokenEmbedding,
    /// Source positional encoding.
    src_pos: PositionalEncoding,
    /// Target token embedding.
    tgt_embed: TokenEmbedding,
    /// Target positional encoding.
    tgt_pos: PositionalEncoding,
    /// Encoder stack.
    encoder: Encoder,
    /// Decoder stack.
    decoder: Decoder,
    /// Output head.
    generator: Generator,
}

impl Translator {
    /// Create a new model with freshly initialized parameters.
    ///
    /// Weight matrices use candle's variance-scaling linear initializer;
    /// biases start at zero and the positional tables are computed, not
    /// learned. Invalid configurations fail here, never at forward time.
    pub fn new(config: ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        Ok(Self {
            src_embed: TokenEmbedding::new(config.src_vocab_size, config.d_model, vb.pp("src_embed"))?,
            src_pos: PositionalEncoding::new(config.d_model, config.max_position, config.dropout, &device)?,
            tgt_embed: TokenEmbedding::new(config.tgt_vocab_size, config.d_model, vb.pp("tgt_embed"))?,
            tgt_pos: PositionalEncoding::new(config.d_model, config.max_position, config.dropout, &device)?,
            encoder: Encoder::new(&config, vb.pp("encoder"))?,
            decoder: Decoder::new(&config, vb.pp("decoder"))?,
            generator: Generator::new(config.d_model, config.tgt_vocab_size, vb.pp("generator"))?,
            config,
        })
    }

    /// Encode a source batch into memory for the decoder.
    ///
    /// # Arguments
    ///
    /// * `src` - Source ids `(batch, src_len)`, u32
    /// * `src_mask` - Source padding mask `(batch, 1, src_len)`
    pub fn encode(&self, src: &Tensor, src_mask: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.src_embed.forward(src)?;
        let x = self.src_pos.forward(&x, train)?;
        self.encoder.forward(&x, src_mask, train)
    }

    /// Decode a target prefix against encoder memory.
    ///
    /// # Arguments
    ///
    /// * `memory` - Encoder output `(batch, src_len, d_model)`
    /// * `src_mask` - Source padding mask `(batch, 1, src_len)`
    /// * `tgt` - Target prefix ids `(batch, tgt_len)`, u32
    /// * `tgt_mask` - Padding/causal mask `(batch|1, tgt_len, tgt_len)`
    pub fn decode(
        &self,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let x = self.tgt_embed.forward(tgt)?;
        let x = self.tgt_pos.forward(&x, train)?;
        self.decoder.forward(&x, memory, src_mask, tgt_mask, train)
    }

    /// Full teacher-forced pass: encode then decode.
    ///
    /// Returns decoder states `(batch, tgt_len, d_model)`; apply the
    /// [`Generator`] to obtain log-probabilities.
    pub fn forward(
        &self,
        src: &Tensor,
        tgt: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let memory = self.encode(src, src_mask, train)?;
        self.decode(&memory, src_mask, tgt, tgt_mask, train)
    }

    /// Output head.
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("config", &self.config)
            .finish()
    }
}
