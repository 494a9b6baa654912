//! DataLoader for creating padded SFT batches.

use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{CollatedBatch, DataCollator, TokenizedDataset, TokenizedExample};
use gatemix_core::Result;

/// Configuration for the DataLoader.
#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Batch size.
    pub batch_size: usize,
    /// Whether to shuffle the data.
    pub shuffle: bool,
    /// Random seed for shuffling.
    pub seed: u64,
    /// Whether to drop the last incomplete batch.
    pub drop_last: bool,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            shuffle: true,
            seed: 42,
            drop_last: false,
        }
    }
}

/// DataLoader that yields collated batches from a tokenized dataset.
pub struct DataLoader {
    dataset: TokenizedDataset,
    collator: DataCollator,
    config: DataLoaderConfig,
    /// Current index permutation.
    indices: Vec<usize>,
    position: usize,
}

impl DataLoader {
    /// Create a new DataLoader.
    ///
    /// A batch size of zero is treated as one.
    pub fn new(dataset: TokenizedDataset, collator: DataCollator, mut config: DataLoaderConfig) -> Self {
        config.batch_size = config.batch_size.max(1);
        let mut indices: Vec<usize> = (0..dataset.len()).collect();

        if config.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
            indices.shuffle(&mut rng);
        }

        Self {
            dataset,
            collator,
            config,
            indices,
            position: 0,
        }
    }

    /// Reset the DataLoader for a new epoch.
    pub fn reset(&mut self, new_seed: Option<u64>) {
        self.position = 0;
        if self.config.shuffle {
            let seed = new_seed.unwrap_or(self.config.seed);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            self.indices.shuffle(&mut rng);
        }
    }

    /// Get the number of batches.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.config.drop_last {
            n / self.config.batch_size
        } else {
            n.div_ceil(self.config.batch_size)
        }
    }

    /// Get the total number of examples.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Check if the loader is empty.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Get the next batch.
    pub fn next_batch(&mut self) -> Option<Result<CollatedBatch>> {
        if self.position >= self.indices.len() {
            return None;
        }

        let batch_end = (self.position + self.config.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.position..batch_end];

        if self.config.drop_last && batch_indices.len() < self.config.batch_size {
            return None;
        }

        let examples: Vec<TokenizedExample> = batch_indices
            .iter()
            .filter_map(|&i| self.dataset.get(i).cloned())
            .collect();
        self.position = batch_end;

        Some(self.collator.collate(&examples))
    }
}

impl Iterator for DataLoader {
    type Item = Result<CollatedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}
