//! Core types and configuration for gatemix.
//!
//! This crate provides the foundational pieces shared by the data pipeline
//! and the CLI:
//!
//! - Error handling infrastructure
//! - Configuration types for the model, LoRA, quantization, the SFT mixture
//!   and constant-length packing

#![warn(missing_docs)]

mod config;
mod error;

pub use config::*;
pub use error::*;

/// The loss-masking sentinel shared by every label channel.
pub const IGNORE_INDEX: i64 = -100;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{GatemixError, Result};
    pub use crate::IGNORE_INDEX;
}
