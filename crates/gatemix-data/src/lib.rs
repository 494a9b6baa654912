//! Dataset handling and preprocessing for gatemix.
//!
//! This crate provides:
//! - Prompt/response tokenization with loss and gate label channels
//! - Data collation into padded, rectangular batches
//! - A DataLoader that applies the collator
//! - Streaming constant-length packing for continued pretraining
//! - Characters-per-token estimation
//! - Restartable record sources (in-memory, JSONL, Parquet)
//! - Multi-corpus mixtures with per-corpus gate indices
//! - Tokenizer integration

#![warn(missing_docs)]

pub mod collator;
pub mod dataloader;
pub mod dataset;
pub mod mixture;
pub mod packing;
pub mod ratio;
pub mod source;
pub mod tokenize;
pub mod tokenizer;

#[cfg(test)]
mod testing;

pub use collator::*;
pub use dataloader::*;
pub use dataset::*;
pub use mixture::*;
pub use packing::*;
pub use ratio::*;
pub use source::*;
pub use tokenize::*;
pub use tokenizer::*;

pub use gatemix_core::IGNORE_INDEX;
