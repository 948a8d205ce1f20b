//! Token vocabulary with reserved sequence markers.
//!
//! Maps tokens to dense integer ids and back. Four reserved tokens always
//! occupy the lowest ids and are never removed:
//!
//! | Token | Id |
//! |-------|----|
//! | `<BOS>` | 0 |
//! | `<EOS>` | 1 |
//! | `<PAD>` | 2 |
//! | `<UNK>` | 3 |
//!
//! The vocabulary size fixes the embedding table row count and the
//! generator's output width, so it must not change after the model is
//! constructed.

use crate::error::{BrocaError, Result};
use std::collections::HashMap;
use std::io::BufRead;

/// Sequence-start marker.
pub const BOS: &str = "<BOS>";
/// Sequence-end marker.
pub const EOS: &str = "<EOS>";
/// Padding marker.
pub const PAD: &str = "<PAD>";
/// Unknown-token marker.
pub const UNK: &str = "<UNK>";

/// Id of the sequence-start marker.
pub const BOS_ID: u32 = 0;
/// Id of the sequence-end marker.
pub const EOS_ID: u32 = 1;
/// Id of the padding marker.
pub const PAD_ID: u32 = 2;
/// Id of the unknown-token marker.
pub const UNK_ID: u32 = 3;

const RESERVED: [&str; 4] = [BOS, EOS, PAD, UNK];

/// Bidirectional token/id mapping.
#[derive(Clone)]
pub struct Vocab {
    /// Tokens in id order; the index of a token is its id.
    words: Vec<String>,
    /// Reverse mapping from token to id.
    ids: HashMap<String, u32>,
}

impl Vocab {
    /// Create a vocabulary holding only the reserved tokens.
    pub fn new() -> Self {
        let words: Vec<String> = RESERVED.iter().map(|w| w.to_string()).collect();
        let ids = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        Self { words, ids }
    }

    /// Build a vocabulary from a line-oriented source.
    ///
    /// The first whitespace-delimited field of each line is taken as a
    /// token; ids are assigned in order of first appearance, after the
    /// reserved ids. Blank lines are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut vocab = Self::new();
        for line in reader.lines() {
            let line = line?;
            if let Some(word) = line.split_whitespace().next() {
                vocab.add(word);
            }
        }
        Ok(vocab)
    }

    /// Rebuild a vocabulary from a previously persisted word list.
    ///
    /// The list must start with the four reserved tokens in their fixed
    /// order; anything else indicates a checkpoint from an incompatible
    /// build.
    pub fn from_words<S: AsRef<str>>(words: &[S]) -> Result<Self> {
        let prefix: Vec<&str> = words.iter().take(RESERVED.len()).map(|w| w.as_ref()).collect();
        if prefix != RESERVED {
            return Err(BrocaError::InvalidConfig(format!(
                "vocabulary does not start with the reserved tokens {:?}",
                RESERVED
            )));
        }
        let mut vocab = Self::new();
        for word in &words[RESERVED.len()..] {
            vocab.add(word.as_ref());
        }
        Ok(vocab)
    }

    /// Add a token, assigning it the next free id. Duplicates are ignored.
    pub fn add(&mut self, word: &str) {
        if !self.ids.contains_key(word) {
            self.ids.insert(word.to_string(), self.words.len() as u32);
            self.words.push(word.to_string());
        }
    }

    /// Remove a token. Later ids shift down so ids stay dense.
    ///
    /// Reserved tokens are never removed.
    pub fn remove(&mut self, word: &str) {
        if RESERVED.contains(&word) {
            return;
        }
        if let Some(pos) = self.words.iter().position(|w| w == word) {
            self.words.remove(pos);
            self.ids = self
                .words
                .iter()
                .enumerate()
                .map(|(i, w)| (w.clone(), i as u32))
                .collect();
        }
    }

    /// Map tokens to ids; tokens not in the vocabulary map to [`UNK_ID`].
    pub fn numberize<S: AsRef<str>>(&self, words: &[S]) -> Vec<u32> {
        words
            .iter()
            .map(|w| self.ids.get(w.as_ref()).copied().unwrap_or(UNK_ID))
            .collect()
    }

    /// Map ids back to tokens.
    ///
    /// Fails with [`BrocaError::UnknownId`] for ids outside the vocabulary,
    /// which indicates a generator sized against a different vocabulary.
    pub fn denumberize(&self, ids: &[u32]) -> Result<Vec<String>> {
        ids.iter()
            .map(|&id| {
                self.words
                    .get(id as usize)
                    .cloned()
                    .ok_or(BrocaError::UnknownId(id as usize))
            })
            .collect()
    }

    /// Token for a single id, if it exists.
    pub fn word(&self, id: u32) -> Option<&str> {
        self.words.get(id as usize).map(|w| w.as_str())
    }

    /// Id for a single token, if it exists.
    pub fn id(&self, word: &str) -> Option<u32> {
        self.ids.get(word).copied()
    }

    /// Number of tokens, including the reserved ones.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// A vocabulary always holds the reserved tokens.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Tokens in id order (for persistence alongside the model).
    pub fn words(&self) -> &[String] {
        &self.words
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Vocab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocab")
            .field("len", &self.len())
            .field("bos_id", &BOS_ID)
            .field("eos_id", &EOS_ID)
            .field("pad_id", &PAD_ID)
            .field("unk_id", &UNK_ID)
            .finish()
    }
}
