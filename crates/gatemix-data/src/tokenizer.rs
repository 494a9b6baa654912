//! Tokenizer integration.
//!
//! The pipeline only needs a narrow capability from a tokenizer, captured by
//! [`TextEncoder`]. [`Tokenizer`] implements it over the `tokenizers` crate.

use gatemix_core::{GatemixError, Result};
use std::path::Path;
use std::sync::Arc;

/// Token ids and attention mask for one encoded text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded {
    /// Token IDs.
    pub ids: Vec<u32>,
    /// Attention mask, one entry per id.
    pub attention_mask: Vec<u32>,
}

impl Encoded {
    /// Build an encoding whose mask attends to every token.
    pub fn from_ids(ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; ids.len()];
        Self {
            ids,
            attention_mask,
        }
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no tokens were produced.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Read-only tokenizer capability used by the data pipeline.
///
/// Implementations must never truncate, and must be shareable across the
/// threads that tokenize a dataset in parallel.
pub trait TextEncoder: Send + Sync {
    /// Encode a single text.
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Encoded>;

    /// Encode several texts, preserving order.
    fn encode_batch(&self, texts: &[&str], add_special_tokens: bool) -> Result<Vec<Encoded>> {
        texts
            .iter()
            .map(|text| self.encode(text, add_special_tokens))
            .collect()
    }

    /// Padding token ID, if the vocabulary has one.
    fn pad_token_id(&self) -> Option<u32>;

    /// End-of-sequence token ID, if the vocabulary has one.
    fn eos_token_id(&self) -> Option<u32>;
}

/// Cloneable wrapper around the tokenizers library.
///
/// Clones share one immutable tokenizer.
#[derive(Clone)]
pub struct Tokenizer {
    inner: Arc<tokenizers::Tokenizer>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .finish()
    }
}

impl Tokenizer {
    /// Load a tokenizer from a local `tokenizer.json`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| GatemixError::Tokenizer(e.to_string()))?;
        Self::from_inner(inner)
    }

    /// Load a tokenizer from the bytes of a `tokenizer.json`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| GatemixError::Tokenizer(e.to_string()))?;
        Self::from_inner(inner)
    }

    /// Wrap an already-built tokenizer.
    ///
    /// Truncation and padding baked into the file are switched off; length
    /// limits are applied by the pipeline itself.
    pub fn from_inner(mut inner: tokenizers::Tokenizer) -> Result<Self> {
        inner
            .with_truncation(None)
            .map_err(|e| GatemixError::Tokenizer(e.to_string()))?;
        inner.with_padding(None);
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Decode token IDs to text.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| GatemixError::Tokenizer(e.to_string()))
    }

    /// Get vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Get the underlying tokenizer.
    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }

    fn find_token(&self, candidates: &[&str]) -> Option<u32> {
        candidates
            .iter()
            .find_map(|token| self.inner.token_to_id(token))
    }
}

const PAD_TOKENS: &[&str] = &["<pad>", "[PAD]", "<|pad|>", "<|finetune_right_pad_id|>"];
const EOS_TOKENS: &[&str] = &["</s>", "<|endoftext|>", "<|end_of_text|>", "<|im_end|>", "<eos>"];

impl TextEncoder for Tokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Encoded> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| GatemixError::Tokenizer(e.to_string()))?;
        Ok(Encoded {
            ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
        })
    }

    fn encode_batch(&self, texts: &[&str], add_special_tokens: bool) -> Result<Vec<Encoded>> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), add_special_tokens)
            .map_err(|e| GatemixError::Tokenizer(e.to_string()))?;
        Ok(encodings
            .into_iter()
            .map(|encoding| Encoded {
                ids: encoding.get_ids().to_vec(),
                attention_mask: encoding.get_attention_mask().to_vec(),
            })
            .collect())
    }

    /// Tries common pad token names, falls back to EOS.
    fn pad_token_id(&self) -> Option<u32> {
        self.find_token(PAD_TOKENS).or_else(|| self.eos_token_id())
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.find_token(EOS_TOKENS)
    }
}
