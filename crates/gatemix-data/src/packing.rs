//! Streaming constant-length packing for continued pretraining.
//!
//! Raw text records are buffered, tokenized, joined into one token stream
//! and cut into windows of exactly `seq_length` tokens:
//!
//! ```text
//! records   "a b c"      "d e"      "f g h i"
//! tokens    [a b c EOS] [d e EOS] [f g h i EOS]
//! stream    a b c EOS d e EOS f g h i EOS
//! windows   [a b c EOS] [d e EOS f] [g h i EOS]
//! ```
//!
//! # Buffering
//!
//! Each fill pulls records until the buffered text reaches
//! `seq_length × chars_per_token × num_of_sequences` characters, which
//! should yield roughly `num_of_sequences` windows. A trailing remainder
//! shorter than `seq_length` is dropped and never carried into the next
//! buffer. Shuffling, when enabled, permutes windows within one buffer only.
//!
//! # Exhaustion
//!
//! A finite dataset flushes the partial last buffer and stops. An infinite
//! one reopens its [`RecordSource`] and keeps filling the same buffer, so
//! its iterator never ends; callers stop pulling when they have enough.

use crate::ratio::estimate_chars_per_token;
use crate::source::{text_field, RecordCursor, RecordSource};
use crate::TextEncoder;
use gatemix_core::{GatemixError, PackingConfig, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;

/// A fixed-length training window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedChunk {
    /// Token IDs, exactly `seq_length` long.
    pub input_ids: Vec<u32>,
    /// Targets; identical to `input_ids` (the consumer shifts them).
    pub labels: Vec<u32>,
}

impl PackedChunk {
    /// Create a chunk whose labels copy its inputs.
    pub fn new(window: Vec<u32>) -> Self {
        Self {
            labels: window.clone(),
            input_ids: window,
        }
    }
}

/// A lazily packed dataset over a restartable record source.
pub struct ConstantLengthDataset<S, E> {
    source: S,
    encoder: E,
    config: PackingConfig,
    chars_per_token: f64,
    concat_token_id: Option<u32>,
}

impl<S: RecordSource, E: TextEncoder> ConstantLengthDataset<S, E> {
    /// Create a packed dataset.
    ///
    /// Uses `config.chars_per_token` when set, otherwise
    /// [`PackingConfig::DEFAULT_CHARS_PER_TOKEN`].
    pub fn new(source: S, encoder: E, config: PackingConfig) -> Result<Self> {
        config.validate()?;

        let concat_token_id = if config.add_eos_token {
            let eos = encoder.eos_token_id().ok_or_else(|| {
                GatemixError::Tokenizer("add_eos_token is set but the tokenizer has no EOS".into())
            })?;
            Some(eos)
        } else {
            tracing::warn!("Packing without EOS separators between records");
            None
        };
        let chars_per_token = config
            .chars_per_token
            .unwrap_or(PackingConfig::DEFAULT_CHARS_PER_TOKEN);

        Ok(Self {
            source,
            encoder,
            config,
            chars_per_token,
            concat_token_id,
        })
    }

    /// The packing configuration.
    pub fn config(&self) -> &PackingConfig {
        &self.config
    }

    /// Characters-per-token ratio used for buffer sizing.
    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Buffer threshold in characters.
    pub fn max_buffer_size(&self) -> f64 {
        self.config.max_buffer_size(self.chars_per_token)
    }

    /// Start a new pass over the source.
    pub fn iter(&self) -> ConstantLengthIter<'_, S, E> {
        ConstantLengthIter {
            dataset: self,
            cursor: None,
            chars_since_open: 0,
            state: PackState::Filling,
            ready: VecDeque::new(),
            rng: StdRng::seed_from_u64(self.config.seed),
            chunks_yielded: 0,
            buffers_filled: 0,
        }
    }

    /// Tokenize a buffer of texts and cut it into `seq_length` windows.
    ///
    /// Windows come back in stream order; the remainder is dropped.
    pub fn pack_buffer(&self, texts: &[String]) -> Result<Vec<Vec<u32>>> {
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encoded = self
            .encoder
            .encode_batch(&texts, self.config.add_special_tokens)?;

        let mut all_token_ids = Vec::new();
        for tokens in encoded {
            all_token_ids.extend(tokens.ids);
            all_token_ids.extend(self.concat_token_id);
        }

        let windows: Vec<Vec<u32>> = all_token_ids
            .chunks_exact(self.config.seq_length)
            .map(<[u32]>::to_vec)
            .collect();
        tracing::debug!(
            records = texts.len(),
            tokens = all_token_ids.len(),
            windows = windows.len(),
            dropped = all_token_ids.len() % self.config.seq_length,
            "Packed buffer"
        );
        Ok(windows)
    }
}

impl<'a, S: RecordSource, E: TextEncoder> IntoIterator for &'a ConstantLengthDataset<S, E> {
    type Item = Result<PackedChunk>;
    type IntoIter = ConstantLengthIter<'a, S, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Outer-loop state of a packing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackState {
    /// More buffers can be filled from the source.
    Filling,
    /// The source is exhausted and its last buffer has been packed.
    Flushed,
}

/// One pass over a [`ConstantLengthDataset`].
pub struct ConstantLengthIter<'a, S, E> {
    dataset: &'a ConstantLengthDataset<S, E>,
    cursor: Option<RecordCursor<'a>>,
    chars_since_open: usize,
    state: PackState,
    ready: VecDeque<Vec<u32>>,
    rng: StdRng,
    chunks_yielded: usize,
    buffers_filled: usize,
}

impl<'a, S: RecordSource, E: TextEncoder> ConstantLengthIter<'a, S, E> {
    /// Total chunks handed out so far.
    pub fn chunks_yielded(&self) -> usize {
        self.chunks_yielded
    }

    /// Number of buffers filled so far.
    pub fn buffers_filled(&self) -> usize {
        self.buffers_filled
    }

    fn refill(&mut self) -> Result<()> {
        let buffer = self.fill_buffer()?;
        let mut windows = self.dataset.pack_buffer(&buffer)?;
        if self.dataset.config.shuffle {
            windows.shuffle(&mut self.rng);
        }
        self.buffers_filled += 1;
        self.ready.extend(windows);
        Ok(())
    }

    /// Pull records until the character threshold is reached.
    ///
    /// Moves to [`PackState::Flushed`] when a finite source runs out. An
    /// infinite source whose full pass adds no characters is an error.
    fn fill_buffer(&mut self) -> Result<Vec<String>> {
        let dataset = self.dataset;
        let max_buffer_size = dataset.max_buffer_size();
        let field = dataset.config.content_field.as_str();

        let mut buffer = Vec::new();
        let mut buffer_len = 0usize;

        while (buffer_len as f64) < max_buffer_size {
            if self.cursor.is_none() {
                self.cursor = Some(dataset.source.open()?);
                self.chars_since_open = 0;
            }

            match self.cursor.as_mut().and_then(|cursor| cursor.next()) {
                Some(record) => {
                    let record = record?;
                    let text = text_field(&record, field)?;
                    let chars = text.chars().count();
                    buffer_len += chars;
                    self.chars_since_open += chars;
                    buffer.push(text.to_string());
                }
                None if dataset.config.infinite => {
                    if self.chars_since_open == 0 {
                        return Err(GatemixError::EmptySource);
                    }
                    tracing::debug!(
                        chunks = self.chunks_yielded,
                        "Record source exhausted, restarting"
                    );
                    self.cursor = None;
                }
                None => {
                    self.state = PackState::Flushed;
                    self.cursor = None;
                    break;
                }
            }
        }

        Ok(buffer)
    }
}

impl<'a, S: RecordSource, E: TextEncoder> Iterator for ConstantLengthIter<'a, S, E> {
    type Item = Result<PackedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(window) = self.ready.pop_front() {
                self.chunks_yielded += 1;
                return Some(Ok(PackedChunk::new(window)));
            }
            if self.state == PackState::Flushed {
                return None;
            }
            if let Err(e) = self.refill() {
                self.state = PackState::Flushed;
                return Some(Err(e));
            }
        }
    }
}

/// Build the train/validation packers for continued pretraining.
///
/// The characters-per-token ratio comes from `config.chars_per_token` or is
/// estimated on the first `config.ratio_samples` train records. The train
/// packer restarts forever and shuffles; the validation packer makes one
/// ordered pass. Neither inserts EOS between records.
pub fn create_pretraining_datasets<S, E>(
    train: S,
    valid: S,
    encoder: E,
    config: &PackingConfig,
) -> Result<(ConstantLengthDataset<S, E>, ConstantLengthDataset<S, E>)>
where
    S: RecordSource,
    E: TextEncoder + Clone,
{
    let chars_per_token = match config.chars_per_token {
        Some(ratio) => ratio,
        None => estimate_chars_per_token(
            &train,
            &encoder,
            &config.content_field,
            config.ratio_samples,
        )?,
    };
    tracing::info!(
        "The character to token ratio of the dataset is: {:.2}",
        chars_per_token
    );

    let train_config = PackingConfig {
        chars_per_token: Some(chars_per_token),
        infinite: true,
        shuffle: true,
        add_eos_token: false,
        ..config.clone()
    };
    let valid_config = PackingConfig {
        chars_per_token: Some(chars_per_token),
        infinite: false,
        shuffle: false,
        add_eos_token: false,
        ..config.clone()
    };

    Ok((
        ConstantLengthDataset::new(train, encoder.clone(), train_config)?,
        ConstantLengthDataset::new(valid, encoder, valid_config)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{text_record, Record};
    use crate::testing::IdEncoder;

    fn records(texts: &[&str]) -> Vec<Record> {
        texts.iter().map(|t| text_record("content", *t)).collect()
    }

    fn config(seq_length: usize) -> PackingConfig {
        PackingConfig {
            seq_length,
            shuffle: false,
            ..Default::default()
        }
    }

    fn windows<S: RecordSource>(dataset: &ConstantLengthDataset<S, IdEncoder>) -> Vec<Vec<u32>> {
        dataset
            .iter()
            .map(|chunk| chunk.unwrap().input_ids)
            .collect()
    }

    #[test]
    fn test_remainder_is_dropped() {
        let dataset =
            ConstantLengthDataset::new(records(&["1 2 3", "4 5"]), IdEncoder::default(), config(4))
                .unwrap();

        let mut iter = dataset.iter();
        let chunk = iter.next().unwrap().unwrap();
        assert_eq!(chunk.input_ids, vec![1, 2, 3, 9]);
        assert_eq!(chunk.labels, chunk.input_ids);
        assert!(iter.next().is_none());
        assert_eq!(iter.chunks_yielded(), 1);
        assert_eq!(iter.buffers_filled(), 1);
    }

    #[test]
    fn test_without_eos() {
        let packing = PackingConfig {
            add_eos_token: false,
            ..config(2)
        };
        let dataset =
            ConstantLengthDataset::new(records(&["1 2 3", "4 5"]), IdEncoder::default(), packing)
                .unwrap();
        assert_eq!(windows(&dataset), vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_remainder_not_carried_across_buffers() {
        // 4-character buffers.
        let packing = PackingConfig {
            num_of_sequences: 1,
            chars_per_token: Some(1.0),
            ..config(4)
        };
        let dataset = ConstantLengthDataset::new(
            records(&["1 2 3", "4 5", "6 7 8", "1"]),
            IdEncoder::default(),
            packing,
        )
        .unwrap();

        assert_eq!(windows(&dataset), vec![vec![1, 2, 3, 9], vec![4, 5, 9, 6]]);
    }

    #[test]
    fn test_special_tokens_follow_config() {
        let encoder = IdEncoder {
            bos: Some(5),
            ..Default::default()
        };
        let with_special = ConstantLengthDataset::new(records(&["1"]), encoder.clone(), config(3))
            .unwrap();
        assert_eq!(windows(&with_special), vec![vec![5, 1, 9]]);

        let packing = PackingConfig {
            add_special_tokens: false,
            ..config(2)
        };
        let without = ConstantLengthDataset::new(records(&["1"]), encoder, packing).unwrap();
        assert_eq!(windows(&without), vec![vec![1, 9]]);
    }

    #[test]
    fn test_infinite_restarts_source() {
        let packing = PackingConfig {
            infinite: true,
            num_of_sequences: 2,
            chars_per_token: Some(1.0),
            ..config(4)
        };
        let dataset =
            ConstantLengthDataset::new(records(&["1 2 3"]), IdEncoder::default(), packing).unwrap();

        let mut iter = dataset.iter();
        for _ in 0..25 {
            let chunk = iter.next().unwrap().unwrap();
            assert_eq!(chunk.input_ids, vec![1, 2, 3, 9]);
        }
        assert_eq!(iter.chunks_yielded(), 25);
        assert!(iter.buffers_filled() > 1);
    }

    #[test]
    fn test_infinite_empty_source_is_error() {
        let packing = PackingConfig {
            infinite: true,
            ..config(4)
        };
        let dataset =
            ConstantLengthDataset::new(Vec::<Record>::new(), IdEncoder::default(), packing).unwrap();

        let mut iter = dataset.iter();
        assert!(matches!(iter.next(), Some(Err(GatemixError::EmptySource))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_infinite_source_without_text_is_error() {
        let packing = PackingConfig {
            infinite: true,
            ..config(4)
        };
        let dataset =
            ConstantLengthDataset::new(records(&["", ""]), IdEncoder::default(), packing).unwrap();

        let mut iter = dataset.iter();
        assert!(matches!(iter.next(), Some(Err(GatemixError::EmptySource))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_finite_empty_source_yields_nothing() {
        let dataset =
            ConstantLengthDataset::new(Vec::<Record>::new(), IdEncoder::default(), config(4))
                .unwrap();
        assert!(dataset.iter().next().is_none());
    }

    #[test]
    fn test_shuffle_permutes_within_buffer() {
        let texts: Vec<String> = (1..=40).map(|i| format!("{i} {i} {i}")).collect();
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();

        let ordered =
            ConstantLengthDataset::new(records(&texts), IdEncoder::default(), config(4)).unwrap();
        let shuffled_config = PackingConfig {
            shuffle: true,
            seed: 7,
            ..config(4)
        };
        let shuffled =
            ConstantLengthDataset::new(records(&texts), IdEncoder::default(), shuffled_config)
                .unwrap();

        let ordered = windows(&ordered);
        let mut shuffled = windows(&shuffled);
        assert_eq!(ordered.len(), 40);
        assert_ne!(shuffled, ordered);
        shuffled.sort();
        let mut expected = ordered.clone();
        expected.sort();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn test_restarting_iteration_repeats_pass() {
        let dataset = ConstantLengthDataset::new(
            records(&["1 2 3", "4 5 6", "7"]),
            IdEncoder::default(),
            config(4),
        )
        .unwrap();
        assert_eq!(windows(&dataset), windows(&dataset));
    }

    #[test]
    fn test_missing_content_field() {
        let packing = PackingConfig {
            content_field: "text".into(),
            ..config(4)
        };
        let dataset =
            ConstantLengthDataset::new(records(&["1 2 3"]), IdEncoder::default(), packing).unwrap();
        let mut iter = dataset.iter();
        assert!(matches!(iter.next(), Some(Err(GatemixError::MissingField { .. }))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_eos_required_when_requested() {
        let encoder = IdEncoder {
            eos: None,
            ..Default::default()
        };
        assert!(ConstantLengthDataset::new(records(&["1"]), encoder, config(4)).is_err());
    }

    #[test]
    fn test_max_buffer_size() {
        let packing = PackingConfig {
            num_of_sequences: 3,
            chars_per_token: Some(2.5),
            ..config(4)
        };
        let dataset = ConstantLengthDataset::new(records(&[]), IdEncoder::default(), packing).unwrap();
        assert_eq!(dataset.max_buffer_size(), 30.0);
        assert_eq!(dataset.chars_per_token(), 2.5);
    }

    #[test]
    fn test_create_pretraining_datasets() {
        let train = records(&["1 2 3", "4 5 6"]);
        let valid = records(&["7 8 9 10", "11"]);
        let packing = PackingConfig {
            seq_length: 4,
            ..Default::default()
        };
        let (train, valid) =
            create_pretraining_datasets(train, valid, IdEncoder::default(), &packing).unwrap();

        // "1 2 3" is 5 characters and encodes to 3 tokens.
        assert_eq!(train.chars_per_token(), 10.0 / 6.0);
        assert!(train.config().infinite);
        assert!(train.config().shuffle);
        assert!(!valid.config().infinite);
        assert!(!valid.config().shuffle);
        assert!(!train.config().add_eos_token);
        assert!(!valid.config().add_eos_token);

        assert_eq!(train.iter().take(5).count(), 5);
        assert!(train
            .iter()
            .take(5)
            .all(|chunk| !chunk.unwrap().input_ids.contains(&9)));
        assert_eq!(windows(&valid), vec![vec![7, 8, 9, 10]]);
    }
}
