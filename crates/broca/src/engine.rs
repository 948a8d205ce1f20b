//! High-level translation engine.
//!
//! Owns the model parameters, both vocabularies and the configuration,
//! and orchestrates the flows around the core: corpus loading,
//! epoch-by-epoch training with validation and a plateau learning-rate
//! schedule, checkpointing, and translation of numberized token
//! sequences. Subword segmentation and detokenization stay outside.

use broca_core::batch::{group_by_length, Batch};
use broca_core::error::{BrocaError, Result};
use broca_core::mask::padding_mask;
use broca_core::model::{ModelConfig, Translator};
use broca_core::search::{beam_search, greedy_decode, trim_at_eos, BeamConfig};
use broca_core::train::{evaluate, train_epoch, LabelSmoothing, PlateauConfig, ReduceOnPlateau};
use broca_core::vocab::{Vocab, BOS, BOS_ID, EOS, EOS_ID, PAD_ID};
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, Instant};

/// Weights file inside a checkpoint directory.
const WEIGHTS_FILE: &str = "model.safetensors";
/// Manifest file inside a checkpoint directory.
const MANIFEST_FILE: &str = "engine.json";

/// Configuration for the translation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
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
    /// Positional table length.
    pub max_position: usize,
    /// Sequences per training batch.
    pub batch_size: usize,
    /// Training epochs.
    pub num_epochs: usize,
    /// Initial learning rate.
    pub learning_rate: f64,
    /// Label smoothing weight.
    pub label_smoothing: f64,
    /// Drop sentence pairs whose wrapped source exceeds this length.
    pub max_sentence_len: Option<usize>,
    /// Cap on the number of corpus pairs used; must stay strictly below
    /// the corpus size.
    pub data_limit: Option<usize>,
    /// Fraction of the data limit held out for validation.
    pub validation_fraction: f64,
    /// Beam width for translation; 1 selects the greedy baseline.
    pub beam_width: usize,
    /// Maximum decoded length, the start id included.
    pub max_decode_len: usize,
}

impl EngineConfig {
    /// Check the training-side configuration.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BrocaError::InvalidConfig("batch_size must be non-zero".into()));
        }
        if self.learning_rate <= 0.0 {
            return Err(BrocaError::InvalidConfig(format!(
                "learning rate {} must be positive",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) || self.validation_fraction == 0.0 {
            return Err(BrocaError::InvalidConfig(format!(
                "validation fraction {} is outside (0, 1)",
                self.validation_fraction
            )));
        }
        if self.beam_width == 0 {
            return Err(BrocaError::InvalidConfig("beam_width must be non-zero".into()));
        }
        if self.max_decode_len < 2 {
            return Err(BrocaError::InvalidConfig(
                "max_decode_len must leave room for a generated token".into(),
            ));
        }
        Ok(())
    }

    /// The model configuration for the given vocabulary sizes.
    fn model_config(&self, src_vocab_size: usize, tgt_vocab_size: usize) -> ModelConfig {
        ModelConfig {
            src_vocab_size,
            tgt_vocab_size,
            d_model: self.d_model,
            d_ff: self.d_ff,
            num_heads: self.num_heads,
            num_layers: self.num_layers,
            dropout: self.dropout,
            max_position: self.max_position,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            d_model: 512,
            d_ff: 2048,
            num_heads: 8,
            num_layers: 6,
            dropout: 0.1,
            max_position: 5000,
            batch_size: 16,
            num_epochs: 10,
            learning_rate: 1e-4,
            label_smoothing: 0.1,
            max_sentence_len: None,
            data_limit: None,
            validation_fraction: 0.005,
            beam_width: 4,
            max_decode_len: 64,
        }
    }
}

/// Builder for creating an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    device: Device,
    src_vocab: Option<Vocab>,
    tgt_vocab: Option<Vocab>,
}

impl EngineBuilder {
    /// Create a new engine builder.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            device: Device::Cpu,
            src_vocab: None,
            tgt_vocab: None,
        }
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the compute device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Set the source vocabulary.
    pub fn source_vocab(mut self, vocab: Vocab) -> Self {
        self.src_vocab = Some(vocab);
        self
    }

    /// Set the target vocabulary.
    pub fn target_vocab(mut self, vocab: Vocab) -> Self {
        self.tgt_vocab = Some(vocab);
        self
    }

    /// Build the engine with freshly initialized parameters.
    pub fn build(self) -> Result<Engine> {
        let src_vocab = self
            .src_vocab
            .ok_or_else(|| BrocaError::InvalidConfig("source vocabulary not set".into()))?;
        let tgt_vocab = self
            .tgt_vocab
            .ok_or_else(|| BrocaError::InvalidConfig("target vocabulary not set".into()))?;
        self.config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let model = Translator::new(
            self.config.model_config(src_vocab.len(), tgt_vocab.len()),
            vb,
        )?;
        Ok(Engine {
            config: self.config,
            device: self.device,
            varmap,
            model,
            src_vocab,
            tgt_vocab,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-epoch training report.
#[derive(Debug, Clone)]
pub struct EpochReport {
    /// Epoch number, starting at 1.
    pub epoch: usize,
    /// Mean training loss per non-pad token.
    pub train_loss: f32,
    /// Mean validation loss per non-pad token.
    pub valid_loss: f32,
    /// Learning rate after the scheduler step.
    pub learning_rate: f64,
    /// Wall-clock time for the epoch.
    pub elapsed: Duration,
}

/// Checkpoint manifest persisted alongside the weights, keeping the
/// reserved ids and vocabulary order stable across training and
/// inference.
#[derive(Serialize, Deserialize)]
struct Manifest {
    config: EngineConfig,
    src_vocab: Vec<String>,
    tgt_vocab: Vec<String>,
}

/// High-level translation engine.
pub struct Engine {
    config: EngineConfig,
    device: Device,
    varmap: VarMap,
    model: Translator,
    src_vocab: Vocab,
    tgt_vocab: Vocab,
}

impl Engine {
    /// Create a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying model.
    pub fn model(&self) -> &Translator {
        &self.model
    }

    /// Source vocabulary.
    pub fn src_vocab(&self) -> &Vocab {
        &self.src_vocab
    }

    /// Target vocabulary.
    pub fn tgt_vocab(&self) -> &Vocab {
        &self.tgt_vocab
    }

    /// Read a tab-separated parallel corpus, wrapping each side with the
    /// sequence markers and dropping pairs whose wrapped source exceeds
    /// the configured length.
    pub fn read_corpus<R: BufRead>(&self, reader: R) -> Result<Vec<(Vec<String>, Vec<String>)>> {
        let mut pairs = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (src_line, tgt_line) = line.split_once('\t').ok_or_else(|| {
                BrocaError::Corpus(format!("line {} has no tab separator", line_no + 1))
            })?;
            let src_words = wrap(src_line);
            let tgt_words = wrap(tgt_line);
            if let Some(max_len) = self.config.max_sentence_len {
                if src_words.len() > max_len {
                    continue;
                }
            }
            pairs.push((src_words, tgt_words));
        }
        Ok(pairs)
    }

    /// Train on a parallel corpus.
    ///
    /// Splits off the validation fraction, trains epoch by epoch with the
    /// plateau schedule observing validation loss, and hands every
    /// [`EpochReport`] to `on_epoch` as it is produced.
    pub fn train<R: BufRead, F: FnMut(&EpochReport)>(
        &mut self,
        reader: R,
        mut on_epoch: F,
    ) -> Result<Vec<EpochReport>> {
        let mut pairs = self.read_corpus(reader)?;
        let limit = match self.config.data_limit {
            Some(limit) => {
                if limit >= pairs.len() {
                    return Err(BrocaError::InvalidConfig(format!(
                        "data limit {} is not strictly smaller than the corpus size {}",
                        limit,
                        pairs.len()
                    )));
                }
                limit
            }
            None => pairs.len(),
        };
        pairs.truncate(limit);

        let valid_start = ((1.0 - self.config.validation_fraction) * limit as f64).ceil() as usize;
        let valid_pairs = pairs.split_off(valid_start);
        let train_batches = self.make_batches(pairs)?;
        let valid_batches = self.make_batches(valid_pairs)?;
        if train_batches.is_empty() || valid_batches.is_empty() {
            return Err(BrocaError::InvalidConfig(format!(
                "splits of {} pairs leave no full batch of {} on each side",
                limit, self.config.batch_size
            )));
        }

        let loss = LabelSmoothing::new(self.config.label_smoothing, PAD_ID)?;
        let mut optimizer = AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr: self.config.learning_rate,
                ..Default::default()
            },
        )?;
        let mut scheduler = ReduceOnPlateau::new(PlateauConfig::default());
        let mut rng = rand::thread_rng();
        let mut train_batches = train_batches;
        let mut reports = Vec::with_capacity(self.config.num_epochs);

        for epoch in 0..self.config.num_epochs {
            let start = Instant::now();
            train_batches.shuffle(&mut rng);
            let train_loss = train_epoch(&self.model, &train_batches, &loss, &mut optimizer)?;
            let valid_loss = evaluate(&self.model, &valid_batches, &loss)?;
            scheduler.step(valid_loss, &mut optimizer);
            let report = EpochReport {
                epoch: epoch + 1,
                train_loss,
                valid_loss,
                learning_rate: optimizer.learning_rate(),
                elapsed: start.elapsed(),
            };
            on_epoch(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    /// Translate one tokenized source sentence into target tokens.
    ///
    /// Wraps the input with the sequence markers, numberizes, decodes
    /// (greedy at beam width 1, beam search otherwise), trims at the
    /// first sequence-end id, and denumberizes. The returned tokens carry
    /// no reserved markers; joining and detokenizing them is the
    /// caller's business.
    pub fn translate<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<String>> {
        let mut words = vec![BOS.to_string()];
        words.extend(tokens.iter().map(|t| t.as_ref().to_string()));
        words.push(EOS.to_string());

        let ids = self.src_vocab.numberize(&words);
        let src = Tensor::from_vec(ids, (1, words.len()), &self.device)?;
        let src_mask = padding_mask(&src, PAD_ID)?;

        let out = if self.config.beam_width <= 1 {
            let decoded =
                greedy_decode(&self.model, &src, &src_mask, self.config.max_decode_len, BOS_ID)?;
            decoded.to_vec2::<u32>()?.remove(0)
        } else {
            let memory = self.model.encode(&src, &src_mask, false)?;
            let config = BeamConfig {
                beam_width: self.config.beam_width,
                max_len: self.config.max_decode_len,
                ..Default::default()
            };
            beam_search(&self.model, &memory, &src_mask, &config)?.remove(0)
        };

        let trimmed: Vec<u32> = trim_at_eos(&out, EOS_ID)
            .iter()
            .copied()
            .filter(|&id| id != BOS_ID && id != EOS_ID && id != PAD_ID)
            .collect();
        self.tgt_vocab.denumberize(&trimmed)
    }

    /// Persist the weights and a manifest with the configuration and both
    /// vocabularies.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        let manifest = Manifest {
            config: self.config.clone(),
            src_vocab: self.src_vocab.words().to_vec(),
            tgt_vocab: self.tgt_vocab.words().to_vec(),
        };
        let file = std::fs::File::create(dir.join(MANIFEST_FILE))?;
        serde_json::to_writer_pretty(file, &manifest)?;
        Ok(())
    }

    /// Reconstruct an engine from a checkpoint directory.
    ///
    /// Fails fast when the stored vocabularies do not match the stored
    /// weights, rather than decoding against a mis-sized generator.
    pub fn load(dir: &Path, device: Device) -> Result<Engine> {
        let contents = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest: Manifest = serde_json::from_str(&contents)?;
        let src_vocab = Vocab::from_words(&manifest.src_vocab)?;
        let tgt_vocab = Vocab::from_words(&manifest.tgt_vocab)?;
        let mut engine = Engine::builder()
            .config(manifest.config)
            .device(device)
            .source_vocab(src_vocab)
            .target_vocab(tgt_vocab)
            .build()?;
        engine.varmap.load(dir.join(WEIGHTS_FILE))?;
        Ok(engine)
    }

    /// Numberize padded groups into training batches.
    fn make_batches(&self, pairs: Vec<(Vec<String>, Vec<String>)>) -> Result<Vec<Batch>> {
        let groups = group_by_length(pairs, self.config.batch_size)?;
        groups
            .iter()
            .map(|group| {
                Batch::from_pairs(group, &self.src_vocab, &self.tgt_vocab, PAD_ID, &self.device)
            })
            .collect()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("src_vocab", &self.src_vocab)
            .field("tgt_vocab", &self.tgt_vocab)
            .finish()
    }
}

/// Wrap one side of a corpus line with the sequence markers.
fn wrap(line: &str) -> Vec<String> {
    let mut words = vec![BOS.to_string()];
    words.extend(line.split_whitespace().map(|w| w.to_string()));
    words.push(EOS.to_string());
    words
}
