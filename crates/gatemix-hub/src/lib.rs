//! HuggingFace Hub integration for gatemix.
//!
//! This crate provides:
//! - Tokenizer downloading from HuggingFace Hub
//! - Resolution of a tokenizer argument to a local `tokenizer.json`

#![warn(missing_docs)]

mod download;

pub use download::*;
