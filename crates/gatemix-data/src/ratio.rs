//! Characters-per-token estimation for sizing packing buffers.

use crate::source::{text_field, RecordSource};
use crate::TextEncoder;
use gatemix_core::{GatemixError, Result};

/// Estimate the average number of characters per token of `field`.
///
/// Reads the first `sample_count` records of `source`. Texts are encoded
/// with the tokenizer's special tokens, as a plain tokenizer call would.
pub fn estimate_chars_per_token<S, E>(
    source: &S,
    encoder: &E,
    field: &str,
    sample_count: usize,
) -> Result<f64>
where
    S: RecordSource + ?Sized,
    E: TextEncoder + ?Sized,
{
    estimate_chars_per_token_with_progress(source, encoder, field, sample_count, |_| {})
}

/// Same as [`estimate_chars_per_token`], calling `on_record` with the number
/// of records processed so far.
pub fn estimate_chars_per_token_with_progress<S, E, F>(
    source: &S,
    encoder: &E,
    field: &str,
    sample_count: usize,
    mut on_record: F,
) -> Result<f64>
where
    S: RecordSource + ?Sized,
    E: TextEncoder + ?Sized,
    F: FnMut(usize),
{
    let mut total_characters = 0usize;
    let mut total_tokens = 0usize;
    let mut samples = 0usize;

    for record in source.open()?.take(sample_count) {
        let record = record?;
        let text = text_field(&record, field)?;
        total_characters += text.chars().count();
        total_tokens += encoder.encode(text, true)?.len();
        samples += 1;
        on_record(samples);
    }

    if total_tokens == 0 {
        return Err(GatemixError::ZeroTokens { samples });
    }

    let ratio = total_characters as f64 / total_tokens as f64;
    tracing::debug!(samples, total_characters, total_tokens, ratio, "Estimated chars per token");
    Ok(ratio)
}
