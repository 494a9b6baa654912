//! Test encoder that reads whitespace-separated integers as token ids.

use crate::{Encoded, TextEncoder};
use gatemix_core::{GatemixError, Result};

#[derive(Debug, Clone)]
pub(crate) struct IdEncoder {
    pub pad: Option<u32>,
    pub eos: Option<u32>,
    /// Prepended when special tokens are requested.
    pub bos: Option<u32>,
}

impl Default for IdEncoder {
    fn default() -> Self {
        Self {
            pad: Some(0),
            eos: Some(9),
            bos: None,
        }
    }
}

impl TextEncoder for IdEncoder {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Encoded> {
        let mut ids = Vec::new();
        if add_special_tokens {
            ids.extend(self.bos);
        }
        for word in text.split_whitespace() {
            let id = word
                .parse::<u32>()
                .map_err(|e| GatemixError::Tokenizer(format!("'{word}': {e}")))?;
            ids.push(id);
        }
        Ok(Encoded::from_ids(ids))
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos
    }
}
