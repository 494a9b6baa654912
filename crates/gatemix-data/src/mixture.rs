//! Multi-corpus SFT mixtures.
//!
//! Each corpus is tokenized with its own gate index, then all train splits
//! and all test splits are concatenated in configuration order.

use crate::{load_jsonl_examples, TextEncoder, TokenizedDataset};
use gatemix_core::{CorpusConfig, MixtureConfig, Result};
use std::path::Path;

/// Per-corpus counts after tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusStats {
    /// Corpus name.
    pub name: String,
    /// Gate index assigned to the corpus.
    pub data_index: u32,
    /// Train examples.
    pub train_examples: usize,
    /// Test examples.
    pub test_examples: usize,
    /// Tokens across train examples.
    pub train_tokens: usize,
    /// Train positions contributing to the loss.
    pub supervised_tokens: usize,
}

/// Merged train and test sets.
#[derive(Debug, Clone)]
pub struct MixtureSplits {
    /// Concatenated train examples.
    pub train: TokenizedDataset,
    /// Concatenated test examples.
    pub test: TokenizedDataset,
    /// Counts per corpus, in concatenation order.
    pub stats: Vec<CorpusStats>,
}

/// Load, tokenize and merge every corpus of a mixture.
pub fn load_mixture<E: TextEncoder + ?Sized>(
    config: &MixtureConfig,
    encoder: &E,
) -> Result<MixtureSplits> {
    config.validate()?;

    let mut train_parts = Vec::with_capacity(config.corpora.len());
    let mut test_parts = Vec::with_capacity(config.corpora.len());
    let mut stats = Vec::with_capacity(config.corpora.len());

    for corpus in &config.corpora {
        let (train, test) = load_corpus(
            corpus,
            &config.data_dir,
            encoder,
            config.max_length,
            config.split_seed,
        )?;

        let corpus_stats = CorpusStats {
            name: corpus.name.clone(),
            data_index: corpus.data_index,
            train_examples: train.len(),
            test_examples: test.len(),
            train_tokens: train.total_tokens(),
            supervised_tokens: train.examples().iter().map(|e| e.supervised_tokens()).sum(),
        };
        tracing::info!(
            corpus = %corpus.name,
            data_index = corpus.data_index,
            train = corpus_stats.train_examples,
            test = corpus_stats.test_examples,
            "Loaded corpus"
        );

        stats.push(corpus_stats);
        train_parts.push(train);
        test_parts.push(test);
    }

    let train = TokenizedDataset::concatenate(train_parts);
    let test = TokenizedDataset::concatenate(test_parts);
    tracing::info!(train = train.len(), test = test.len(), "Mixture is loaded");

    Ok(MixtureSplits { train, test, stats })
}

/// Load and tokenize one corpus, holding out a test split if it has no
/// test file.
fn load_corpus<E: TextEncoder + ?Sized>(
    corpus: &CorpusConfig,
    data_dir: &Path,
    encoder: &E,
    max_length: usize,
    split_seed: u64,
) -> Result<(TokenizedDataset, TokenizedDataset)> {
    let raw_train = load_jsonl_examples(corpus.train_path(data_dir))?;
    let train = TokenizedDataset::tokenize(&raw_train, encoder, max_length, corpus.data_index)?;

    match corpus.test_path(data_dir) {
        Some(test_path) => {
            let raw_test = load_jsonl_examples(test_path)?;
            let test =
                TokenizedDataset::tokenize(&raw_test, encoder, max_length, corpus.data_index)?;
            Ok((train, test))
        }
        None => Ok(train.train_test_split(corpus.test_ratio, split_seed)),
    }
}
