//! Data collation utilities.

use super::{TextEncoder, TokenizedExample};
use gatemix_core::{GatemixError, Result, IGNORE_INDEX};
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Index of the loss channel in [`CollatedBatch::labels`].
pub const LOSS_CHANNEL: usize = 0;
/// Index of the gate channel in [`CollatedBatch::labels`].
pub const GATE_CHANNEL: usize = 1;

/// Data collator that right-pads examples into a rectangular batch.
#[derive(Debug, Clone, Copy)]
pub struct DataCollator {
    /// Padding token ID.
    pub pad_token_id: u32,
}

impl DataCollator {
    /// Create a new data collator.
    pub fn new(pad_token_id: u32) -> Self {
        Self { pad_token_id }
    }

    /// Create a collator that pads with the encoder's pad token.
    pub fn from_encoder<E: TextEncoder + ?Sized>(encoder: &E) -> Result<Self> {
        let pad_token_id = encoder
            .pad_token_id()
            .ok_or_else(|| GatemixError::Tokenizer("tokenizer has no pad or EOS token".into()))?;
        if encoder.eos_token_id() == Some(pad_token_id) {
            tracing::warn!("Tokenizer has no pad token, padding with EOS");
        }
        Ok(Self::new(pad_token_id))
    }

    /// Collate examples into a batch padded to the longest example.
    ///
    /// `input_ids` are padded with the pad token, `attention_mask` with 0 and
    /// both label channels with [`IGNORE_INDEX`], so padding and prompt
    /// positions look the same in the labels.
    pub fn collate(&self, examples: &[TokenizedExample]) -> Result<CollatedBatch> {
        let max_len = examples
            .iter()
            .map(TokenizedExample::len)
            .max()
            .ok_or(GatemixError::EmptyBatch)?;
        let batch_size = examples.len();

        let mut input_ids = Array2::from_elem((batch_size, max_len), i64::from(self.pad_token_id));
        let mut attention_mask = Array2::<i64>::zeros((batch_size, max_len));
        let mut labels = Array3::from_elem((batch_size, 2, max_len), IGNORE_INDEX);

        for (i, example) in examples.iter().enumerate() {
            check_lengths(i, example)?;

            for (j, &id) in example.input_ids.iter().enumerate() {
                input_ids[[i, j]] = i64::from(id);
            }
            for (j, &mask) in example.attention_mask.iter().enumerate() {
                attention_mask[[i, j]] = i64::from(mask);
            }
            for (j, &label) in example.labels.loss.iter().enumerate() {
                labels[[i, LOSS_CHANNEL, j]] = label;
            }
            for (j, &label) in example.labels.gate.iter().enumerate() {
                labels[[i, GATE_CHANNEL, j]] = label;
            }
        }

        Ok(CollatedBatch {
            input_ids,
            attention_mask,
            labels,
        })
    }
}

fn check_lengths(index: usize, example: &TokenizedExample) -> Result<()> {
    let len = example.len();
    let lengths = [
        example.attention_mask.len(),
        example.labels.loss.len(),
        example.labels.gate.len(),
    ];
    if lengths.iter().any(|&l| l != len) {
        return Err(GatemixError::InvalidArgument(format!(
            "example {index}: input_ids has {len} tokens but mask/loss/gate have {lengths:?}"
        )));
    }
    Ok(())
}

/// A collated batch ready for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CollatedBatch {
    /// Input token IDs `[batch_size, seq_len]`.
    pub input_ids: Array2<i64>,
    /// Attention mask `[batch_size, seq_len]`.
    pub attention_mask: Array2<i64>,
    /// Stacked loss and gate labels `[batch_size, 2, seq_len]`.
    pub labels: Array3<i64>,
}

impl CollatedBatch {
    /// Number of examples.
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    /// Padded sequence length.
    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }

    /// Loss channel `[batch_size, seq_len]`.
    pub fn loss_labels(&self) -> ArrayView2<'_, i64> {
        self.labels.index_axis(Axis(1), LOSS_CHANNEL)
    }

    /// Gate channel `[batch_size, seq_len]`.
    pub fn gate_labels(&self) -> ArrayView2<'_, i64> {
        self.labels.index_axis(Axis(1), GATE_CHANNEL)
    }

    /// Number of positions attended to.
    pub fn attended_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }
}
