//! Prompt/response tokenization with loss and gate label channels.
//!
//! Each example is tokenized field by field, prompt first. Prompt tokens are
//! masked out of both label channels with [`IGNORE_INDEX`]; response tokens
//! carry their own id in the loss channel and the corpus index in the gate
//! channel.

use crate::TextEncoder;
use gatemix_core::{Result, IGNORE_INDEX};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A raw prompt/response pair.
///
/// The text is expected to already contain any chat markup; no special
/// tokens are inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExample {
    /// Prompt text, masked out of the loss.
    pub prompt: String,
    /// Response text, supervised.
    pub response: String,
}

impl RawExample {
    /// Create a new example.
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }

    fn field(&self, field: Field) -> &str {
        match field {
            Field::Prompt => &self.prompt,
            Field::Response => &self.response,
        }
    }
}

/// Example fields, in tokenization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Prompt,
    Response,
}

const FIELD_ORDER: [Field; 2] = [Field::Prompt, Field::Response];

/// The two supervision channels of a tokenized example.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionLabels {
    /// Next-token targets; [`IGNORE_INDEX`] on prompt tokens.
    pub loss: Vec<i64>,
    /// Source-corpus index per token; [`IGNORE_INDEX`] on prompt tokens.
    pub gate: Vec<i64>,
}

impl SupervisionLabels {
    fn truncate(&mut self, len: usize) {
        self.loss.truncate(len);
        self.gate.truncate(len);
    }
}

/// A tokenized example ready for collation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    /// Input token IDs.
    pub input_ids: Vec<u32>,
    /// Attention mask.
    pub attention_mask: Vec<u32>,
    /// Loss and gate labels.
    pub labels: SupervisionLabels,
}

impl TokenizedExample {
    /// Sequence length.
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Whether the example has no tokens (e.g. after truncation).
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of positions that contribute to the loss.
    pub fn supervised_tokens(&self) -> usize {
        self.labels
            .loss
            .iter()
            .filter(|&&label| label != IGNORE_INDEX)
            .count()
    }
}

/// Tokenize one example and build its label channels.
///
/// All sequences are right-truncated to `max_length`, which may cut part or
/// all of the response.
pub fn tokenize_example<E: TextEncoder + ?Sized>(
    example: &RawExample,
    encoder: &E,
    max_length: usize,
    data_index: u32,
) -> Result<TokenizedExample> {
    let mut out = TokenizedExample::default();
    let gate_index = i64::from(data_index);

    for field in FIELD_ORDER {
        let encoded = encoder.encode(example.field(field), false)?;
        let n = encoded.ids.len();
        match field {
            Field::Prompt => {
                out.labels.loss.extend(std::iter::repeat(IGNORE_INDEX).take(n));
                out.labels.gate.extend(std::iter::repeat(IGNORE_INDEX).take(n));
            }
            Field::Response => {
                out.labels.loss.extend(encoded.ids.iter().map(|&id| i64::from(id)));
                out.labels.gate.extend(std::iter::repeat(gate_index).take(n));
            }
        }
        out.input_ids.extend(encoded.ids);
        out.attention_mask.extend(encoded.attention_mask);
    }

    out.input_ids.truncate(max_length);
    out.attention_mask.truncate(max_length);
    out.labels.truncate(max_length);
    Ok(out)
}

/// Tokenize many examples in parallel, preserving order.
pub fn tokenize_examples<E: TextEncoder + ?Sized>(
    examples: &[RawExample],
    encoder: &E,
    max_length: usize,
    data_index: u32,
) -> Result<Vec<TokenizedExample>> {
    examples
        .par_iter()
        .map(|example| tokenize_example(example, encoder, max_length, data_index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::IdEncoder;

    const IG: i64 = IGNORE_INDEX;

    #[test]
    fn test_prompt_masked_response_supervised() {
        let example = RawExample::new("11 12 13", "21 22");
        let tokenized = tokenize_example(&example, &IdEncoder::default(), 64, 1).unwrap();

        assert_eq!(tokenized.input_ids, vec![11, 12, 13, 21, 22]);
        assert_eq!(tokenized.attention_mask, vec![1; 5]);
        assert_eq!(tokenized.labels.loss, vec![IG, IG, IG, 21, 22]);
        assert_eq!(tokenized.labels.gate, vec![IG, IG, IG, 1, 1]);
        assert_eq!(tokenized.supervised_tokens(), 2);
    }

    #[test]
    fn test_special_tokens_disabled() {
        let encoder = IdEncoder {
            bos: Some(7),
            ..Default::default()
        };
        let tokenized = tokenize_example(&RawExample::new("1", "2"), &encoder, 8, 0).unwrap();
        assert_eq!(tokenized.input_ids, vec![1, 2]);
    }

    #[test]
    fn test_right_truncation() {
        let example = RawExample::new("1 2 3", "4 5 6");
        let tokenized = tokenize_example(&example, &IdEncoder::default(), 4, 2).unwrap();

        assert_eq!(tokenized.input_ids, vec![1, 2, 3, 4]);
        assert_eq!(tokenized.attention_mask.len(), 4);
        assert_eq!(tokenized.labels.loss, vec![IG, IG, IG, 4]);
        assert_eq!(tokenized.labels.gate, vec![IG, IG, IG, 2]);
    }

    #[test]
    fn test_long_prompt_drops_whole_response() {
        let example = RawExample::new("1 2 3 4", "5 6");
        let tokenized = tokenize_example(&example, &IdEncoder::default(), 3, 0).unwrap();

        assert_eq!(tokenized.len(), 3);
        assert_eq!(tokenized.supervised_tokens(), 0);
        assert!(tokenized.labels.gate.iter().all(|&g| g == IG));
    }

    #[test]
    fn test_zero_length_allowed() {
        let tokenized =
            tokenize_example(&RawExample::new("", ""), &IdEncoder::default(), 16, 0).unwrap();
        assert!(tokenized.is_empty());
        assert!(tokenized.labels.loss.is_empty());

        let truncated =
            tokenize_example(&RawExample::new("1", "2"), &IdEncoder::default(), 0, 0).unwrap();
        assert!(truncated.is_empty());
    }

    #[test]
    fn test_gate_and_loss_share_mask() {
        let examples = [
            RawExample::new("1 2", "3 4 5"),
            RawExample::new("", "6"),
            RawExample::new("7 8 9", ""),
        ];
        for example in &examples {
            let tokenized = tokenize_example(example, &IdEncoder::default(), 64, 3).unwrap();
            for (&loss, &gate) in tokenized.labels.loss.iter().zip(&tokenized.labels.gate) {
                if loss == IG {
                    assert_eq!(gate, IG);
                } else {
                    assert_eq!(gate, 3);
                }
            }
        }
    }

    #[test]
    fn test_tokenizer_error_propagates() {
        let result = tokenize_example(&RawExample::new("x", "1"), &IdEncoder::default(), 8, 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_parallel_tokenization_preserves_order() {
        let examples: Vec<RawExample> = (0..200)
            .map(|i| RawExample::new(format!("{i}"), format!("{} {}", i + 1, i + 2)))
            .collect();
        let tokenized = tokenize_examples(&examples, &IdEncoder::default(), 16, 1).unwrap();

        assert_eq!(tokenized.len(), 200);
        for (i, example) in tokenized.iter().enumerate() {
            let i = i as u32;
            assert_eq!(example.input_ids, vec![i, i + 1, i + 2]);
        }
    }

    #[test]
    fn test_raw_example_ignores_extra_fields() {
        let example: RawExample =
            serde_json::from_str(r#"{"prompt": "a", "response": "b", "source": "x"}"#).unwrap();
        assert_eq!(example, RawExample::new("a", "b"));
    }
}
