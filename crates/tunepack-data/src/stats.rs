//! Dataset statistics

use crate::format::Formatter;
use crate::source::RecordSource;
use anyhow::{Context, Result};
use tunepack_tokenizer::TextCodec;

/// Average number of characters per token over the first `nb_examples` records
///
/// Reads from the current source position, then resets the source to its
/// first record whatever position it started from.
/// Returns `0.0` when no tokens were produced.
pub fn chars_token_ratio(
    source: &mut dyn RecordSource,
    formatter: &dyn Formatter,
    tokenizer: &dyn TextCodec,
    nb_examples: usize,
) -> Result<f64> {
    let mut total_characters = 0usize;
    let mut total_tokens = 0usize;

    for i in 0..nb_examples {
        let Some(record) = source.next_record()? else {
            break;
        };
        let text = formatter
            .format(&record)
            .with_context(|| format!("Failed to format record {}", i))?;
        total_characters += text.chars().count();
        total_tokens += tokenizer
            .encode(&text)
            .with_context(|| format!("Failed to tokenize record {}", i))?
            .len();
    }
    source.reset().context("Failed to rewind record source")?;

    if total_tokens == 0 {
        return Ok(0.0);
    }
    Ok(total_characters as f64 / total_tokens as f64)
}
