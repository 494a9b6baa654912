//! Dataset types and loading.

use super::{tokenize_examples, RawExample, TextEncoder, TokenizedExample};
use gatemix_core::{GatemixError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Load prompt/response pairs from a JSONL file.
///
/// Blank lines are skipped; fields other than `prompt` and `response` are
/// ignored.
pub fn load_jsonl_examples<P: AsRef<Path>>(path: P) -> Result<Vec<RawExample>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        GatemixError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open dataset file {}: {}", path.display(), e),
        ))
    })?;

    let mut examples = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let example: RawExample = serde_json::from_str(&line).map_err(|e| {
            GatemixError::Serialization(format!(
                "{} line {}: {}",
                path.display(),
                line_num + 1,
                e
            ))
        })?;
        examples.push(example);
    }
    Ok(examples)
}

/// A finite dataset of tokenized examples.
#[derive(Debug, Clone, Default)]
pub struct TokenizedDataset {
    examples: Vec<TokenizedExample>,
}

impl TokenizedDataset {
    /// Create a new empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dataset from pre-tokenized examples.
    pub fn from_examples(examples: Vec<TokenizedExample>) -> Self {
        Self { examples }
    }

    /// Tokenize raw examples from one corpus.
    pub fn tokenize<E: TextEncoder + ?Sized>(
        raw: &[RawExample],
        encoder: &E,
        max_length: usize,
        data_index: u32,
    ) -> Result<Self> {
        let examples = tokenize_examples(raw, encoder, max_length, data_index)?;
        Ok(Self { examples })
    }

    /// Concatenate datasets, keeping each one's order.
    pub fn concatenate(parts: impl IntoIterator<Item = TokenizedDataset>) -> Self {
        let examples = parts.into_iter().flat_map(|part| part.examples).collect();
        Self { examples }
    }

    /// Get the number of examples.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Check if the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Get an example by index.
    pub fn get(&self, index: usize) -> Option<&TokenizedExample> {
        self.examples.get(index)
    }

    /// Get all examples.
    pub fn examples(&self) -> &[TokenizedExample] {
        &self.examples
    }

    /// Total number of tokens across examples.
    pub fn total_tokens(&self) -> usize {
        self.examples.iter().map(TokenizedExample::len).sum()
    }

    /// Shuffle the dataset.
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        self.examples.shuffle(&mut rng);
    }

    /// Shuffle, then split off `test_ratio` of the examples as a test set.
    pub fn train_test_split(mut self, test_ratio: f32, seed: u64) -> (Self, Self) {
        self.shuffle(seed);
        let test_size = (self.examples.len() as f32 * test_ratio).ceil() as usize;
        let test_size = test_size.min(self.examples.len());
        let test_examples = self.examples.split_off(self.examples.len() - test_size);

        (
            self,
            Self {
                examples: test_examples,
            },
        )
    }

    /// Write the examples as JSON lines.
    pub fn write_jsonl<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for example in &self.examples {
            serde_json::to_writer(&mut writer, example)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read examples written by [`TokenizedDataset::write_jsonl`].
    pub fn read_jsonl<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut examples = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            examples.push(serde_json::from_str(&line)?);
        }
        Ok(Self { examples })
    }
}

impl IntoIterator for TokenizedDataset {
    type Item = TokenizedExample;
    type IntoIter = std::vec::IntoIter<TokenizedExample>;

    fn into_iter(self) -> Self::IntoIter {
        self.examples.into_iter()
    }
}

impl<'a> IntoIterator for &'a TokenizedDataset {
    type Item = &'a TokenizedExample;
    type IntoIter = std::slice::Iter<'a, TokenizedExample>;

    fn into_iter(self) -> Self::IntoIter {
        self.examples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::IdEncoder;
    use tempfile::NamedTempFile;

    fn numbered(n: u32) -> TokenizedDataset {
        let raw: Vec<RawExample> = (0..n)
            .map(|i| RawExample::new("1", format!("{}", i + 100)))
            .collect();
        TokenizedDataset::tokenize(&raw, &IdEncoder::default(), 8, 0).unwrap()
    }

    #[test]
    fn test_load_jsonl_examples() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"prompt": "Q: 2+2?", "response": "4"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"prompt": "Q: 3+3?", "response": "6", "id": 7}}"#).unwrap();

        let examples = load_jsonl_examples(file.path()).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1], RawExample::new("Q: 3+3?", "6"));
    }

    #[test]
    fn test_load_jsonl_reports_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"prompt": "a", "response": "b"}}"#).unwrap();
        writeln!(file, r#"{{"prompt": "missing response"}}"#).unwrap();

        let err = load_jsonl_examples(file.path()).unwrap_err().to_string();
        assert!(err.contains("line 2"), "{err}");
    }

    #[test]
    fn test_missing_file() {
        let err = load_jsonl_examples("/nonexistent/gatemix.jsonl").unwrap_err();
        assert!(matches!(err, GatemixError::Io(_)));
    }

    #[test]
    fn test_concatenate_keeps_order() {
        let a = numbered(2);
        let b = numbered(3);
        let merged = TokenizedDataset::concatenate([a.clone(), b.clone()]);

        assert_eq!(merged.len(), 5);
        assert_eq!(merged.get(0), a.get(0));
        assert_eq!(merged.get(2), b.get(0));
        assert_eq!(merged.get(4), b.get(2));
        assert_eq!(merged.total_tokens(), 10);
    }

    #[test]
    fn test_train_test_split() {
        let (train, test) = numbered(100).train_test_split(0.1, 42);
        assert_eq!(train.len(), 90);
        assert_eq!(test.len(), 10);

        let (train, test) = numbered(5).train_test_split(0.1, 42);
        assert_eq!(train.len(), 4);
        assert_eq!(test.len(), 1);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let mut a = numbered(20);
        let mut b = numbered(20);
        a.shuffle(7);
        b.shuffle(7);
        assert_eq!(a.examples(), b.examples());
    }

    #[test]
    fn test_jsonl_roundtrip() {
        let dataset = numbered(3);
        let file = NamedTempFile::new().unwrap();
        dataset.write_jsonl(file.path()).unwrap();

        let loaded = TokenizedDataset::read_jsonl(file.path()).unwrap();
        assert_eq!(loaded.examples(), dataset.examples());
    }
}
