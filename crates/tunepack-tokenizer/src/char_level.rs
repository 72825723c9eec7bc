//! Character-level tokenizer
//!
//! Maps each Unicode scalar value to its code point. Needs no training, which
//! makes packed windows easy to reason about in tests and quick inspection.

use crate::{TextCodec, TokenizerError, END_OF_TEXT};
use anyhow::Result;

/// Identity code-point tokenizer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharTokenizer;

impl CharTokenizer {
    /// Boundary ID, one past the largest Unicode code point
    pub const END_OF_TEXT_ID: u32 = 0x11_0000;

    /// Create a new character tokenizer
    pub fn new() -> Self {
        Self
    }
}

impl TextCodec for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let mut out = String::with_capacity(ids.len());
        for &id in ids {
            if id == Self::END_OF_TEXT_ID {
                out.push_str(END_OF_TEXT);
                continue;
            }
            let c = char::from_u32(id).ok_or(TokenizerError::InvalidTokenId(id))?;
            out.push(c);
        }
        Ok(out)
    }

    fn end_of_text_token_id(&self) -> u32 {
        Self::END_OF_TEXT_ID
    }
}
