//! Error types for gatemix.

use thiserror::Error;

/// Result type alias for gatemix operations.
pub type Result<T> = std::result::Result<T, GatemixError>;

/// Main error type for gatemix operations.
#[derive(Error, Debug)]
pub enum GatemixError {
    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors (JSON lines, Parquet decoding).
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Tokenizer errors.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// HuggingFace Hub errors.
    #[error("Hub error: {0}")]
    Hub(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A record did not carry the requested text field.
    #[error("Record is missing string field '{field}'")]
    MissingField {
        /// Requested field name.
        field: String,
    },

    /// Collation was asked to build a batch from zero examples.
    #[error("Cannot collate an empty batch")]
    EmptyBatch,

    /// A full pass over a record source produced no text.
    #[error("Record source has no text to pack")]
    EmptySource,

    /// Ratio estimation saw no tokens to divide by.
    #[error("Cannot estimate characters per token: {samples} samples produced zero tokens")]
    ZeroTokens {
        /// Number of records that were sampled.
        samples: usize,
    },
}
