//! Tokenizers for packed fine-tuning datasets
//!
//! This crate provides:
//! - The [`TextCodec`] capability consumed by the sequence packer
//! - A Byte Pair Encoding (BPE) [`Tokenizer`] backed by aprender
//! - A [`CharTokenizer`] mapping every character to its code point
//!
//! # Example
//!
//! ```no_run
//! use tunepack_tokenizer::{TextCodec, Tokenizer};
//!
//! let corpus = ["Question: what is rust?", "Answer: a language"];
//! let tokenizer = Tokenizer::train_from_iterator(corpus.iter(), 500).expect("Failed to train tokenizer");
//!
//! let ids = tokenizer.encode("Question: what").expect("Encoding failed");
//! let text = tokenizer.decode(&ids).expect("Decoding failed");
//! let eot = tokenizer.end_of_text_token_id();
//! ```

pub mod char_level;

pub use aprender::text::tokenize::BpeTokenizer;
pub use char_level::CharTokenizer;

use anyhow::{Context, Result};
use std::path::Path;

/// Marker placed between two packed records
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Vocabulary lookup errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenizerError {
    /// Token string missing from the vocabulary
    #[error("Token not found in vocabulary: {0}")]
    UnknownToken(String),
    /// ID that maps to no token
    #[error("Token ID {0} is not in the vocabulary")]
    InvalidTokenId(u32),
}

/// Text to token-ID codec
///
/// The sequence packer only needs these three operations, so any vocabulary
/// (BPE, character level, a test double) can drive it.
pub trait TextCodec {
    /// Encode text into an ordered sequence of token IDs
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token IDs back into text
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// ID inserted between two packed records
    fn end_of_text_token_id(&self) -> u32;
}

impl<T: TextCodec + ?Sized> TextCodec for &T {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        (**self).encode(text)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        (**self).decode(ids)
    }

    fn end_of_text_token_id(&self) -> u32 {
        (**self).end_of_text_token_id()
    }
}

/// Tokenizer data
///
/// On-disk form of a trained tokenizer: vocabulary and merge rules only.
/// The end-of-text ID is derived from the vocabulary when loading.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct TokenizerData {
    /// Token to ID mapping
    pub vocabulary: std::collections::HashMap<String, u32>,
    /// BPE merge rules
    pub merges: Vec<(String, String)>,
}

/// BPE tokenizer
///
/// Uses `aprender::text::tokenize::BpeTokenizer` internally. The end-of-text
/// boundary is the vocabulary entry for [`END_OF_TEXT`] when the vocabulary
/// has one; otherwise it is one past the largest vocabulary ID, which never
/// collides with a learned token even when the IDs have gaps.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    bpe: BpeTokenizer,
    eot_id: u32,
}

impl Tokenizer {
    fn from_bpe(bpe: BpeTokenizer) -> Self {
        let eot_id = bpe.token_to_id(END_OF_TEXT).unwrap_or_else(|| {
            bpe.vocab()
                .values()
                .max()
                .map_or(0, |&max_id| max_id + 1)
        });
        Self { bpe, eot_id }
    }

    /// Train a new tokenizer from an iterator of text
    ///
    /// # Arguments
    /// * `text_iterator` - Iterator over training text
    /// * `vocab_size` - Target vocabulary size
    pub fn train_from_iterator<I, S>(text_iterator: I, vocab_size: usize) -> Result<Self>
    where
        I: Iterator<Item = S>,
        S: AsRef<str>,
    {
        let corpus_owned: Vec<String> = text_iterator.map(|s| s.as_ref().to_string()).collect();
        let corpus: Vec<&str> = corpus_owned.iter().map(|s| s.as_str()).collect();

        let bpe = BpeTokenizer::train(&corpus, vocab_size)
            .map_err(|e| anyhow::anyhow!("Failed to train BPE tokenizer: {}", e))?;

        Ok(Self::from_bpe(bpe))
    }

    /// Train tokenizer from text files in a directory
    ///
    /// Every `.txt` file contributes its whole content as one text. Every
    /// `.jsonl` file contributes one text per non-blank line, built from the
    /// string values of the JSON object on that line.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The directory cannot be read
    /// - No usable text is found
    /// - A `.jsonl` line is not valid JSON
    /// - Training fails
    pub fn train_from_directory(data_dir: &Path, vocab_size: usize) -> Result<Self> {
        use std::fs;

        let mut paths: Vec<_> = fs::read_dir(data_dir)
            .with_context(|| format!("Failed to read directory: {:?}", data_dir))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()
            .context("Failed to read directory entry")?;
        paths.sort();

        let mut texts = Vec::new();
        for path in paths {
            match path.extension().and_then(|s| s.to_str()) {
                Some("txt") => {
                    let content = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read file: {:?}", path))?;
                    texts.push(content);
                }
                Some("jsonl") => {
                    let content = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read file: {:?}", path))?;
                    for (line_num, line) in content.lines().enumerate() {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let value: serde_json::Value =
                            serde_json::from_str(line).with_context(|| {
                                format!("Failed to parse line {} in {:?}", line_num + 1, path)
                            })?;
                        texts.push(json_strings(&value).join(" "));
                    }
                }
                _ => {}
            }
        }

        if texts.is_empty() {
            anyhow::bail!("No .txt or .jsonl text found in directory: {:?}", data_dir);
        }

        Self::train_from_iterator(texts.iter(), vocab_size)
            .context("Failed to train tokenizer from data files")
    }

    /// Encode text to token IDs
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        self.bpe.encode(text).map_err(|e| anyhow::anyhow!("Encoding failed: {}", e))
    }

    /// Encode a batch of texts
    pub fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<u32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }

    /// Decode token IDs to text
    ///
    /// Boundary IDs outside the learned vocabulary are rendered as the literal
    /// [`END_OF_TEXT`] marker so packed windows stay readable.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        if self.bpe.token_to_id(END_OF_TEXT).is_some() {
            return self.decode_plain(ids);
        }

        let mut out = String::new();
        for (i, segment) in ids.split(|&id| id == self.eot_id).enumerate() {
            if i > 0 {
                out.push_str(END_OF_TEXT);
            }
            if !segment.is_empty() {
                out.push_str(&self.decode_plain(segment)?);
            }
        }
        Ok(out)
    }

    fn decode_plain(&self, ids: &[u32]) -> Result<String> {
        self.bpe.decode(ids).map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    /// Get the ID for a special token
    pub fn special_token_id(&self, token: &str) -> Result<u32> {
        self.bpe
            .token_to_id(token)
            .ok_or_else(|| TokenizerError::UnknownToken(token.to_string()).into())
    }

    /// Get vocabulary size
    pub fn vocab_size(&self) -> usize {
        self.bpe.vocab_size()
    }

    /// Load tokenizer from a directory containing `tokenizer.json`
    pub fn from_directory<P: AsRef<Path>>(path: P) -> Result<Self> {
        use std::fs;

        let path = path.as_ref();
        let tokenizer_file = path.join("tokenizer.json");

        if !tokenizer_file.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer_file.display());
        }

        let content = fs::read_to_string(&tokenizer_file).with_context(|| {
            format!(
                "Failed to read tokenizer file: {}",
                tokenizer_file.display()
            )
        })?;

        let data: TokenizerData =
            serde_json::from_str(&content).context("Failed to parse tokenizer JSON")?;

        Ok(Self::from_bpe(BpeTokenizer::from_vocab(data.vocabulary, data.merges)))
    }

    /// Save tokenizer to `tokenizer.json` inside a directory
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::fs;

        let path = path.as_ref();
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;

        let tokenizer_file = path.join("tokenizer.json");

        let data = TokenizerData {
            vocabulary: self.bpe.vocab().clone(),
            merges: self.bpe.merges().to_vec(),
        };

        let content = serde_json::to_string(&data).context("Failed to serialize tokenizer")?;

        fs::write(&tokenizer_file, content).with_context(|| {
            format!(
                "Failed to write tokenizer file: {}",
                tokenizer_file.display()
            )
        })?;

        Ok(())
    }
}

impl TextCodec for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Tokenizer::encode(self, text)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Tokenizer::decode(self, ids)
    }

    fn end_of_text_token_id(&self) -> u32 {
        self.eot_id
    }
}

/// Collect the string leaves of a JSON value in document order
fn json_strings(value: &serde_json::Value) -> Vec<&str> {
    match value {
        serde_json::Value::String(s) => vec![s.as_str()],
        serde_json::Value::Array(items) => items.iter().flat_map(json_strings).collect(),
        serde_json::Value::Object(map) => map.values().flat_map(json_strings).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizer_train_and_encode() {
        let corpus = ["hello world", "hello rust"];
        let tokenizer =
            Tokenizer::train_from_iterator(corpus.iter(), 500).expect("Failed to train tokenizer");

        let ids = tokenizer.encode("hello").expect("Encoding failed");
        assert!(!ids.is_empty());
    }

    #[test]
    fn test_end_of_text_outside_vocabulary() {
        let corpus = ["hello world", "hello rust"];
        let tokenizer =
            Tokenizer::train_from_iterator(corpus.iter(), 500).expect("Failed to train tokenizer");

        let eot = tokenizer.end_of_text_token_id();
        let ids = tokenizer.encode("hello").expect("Encoding failed");
        assert!(!ids.contains(&eot));
    }

    fn vocab_of(entries: &[(&str, u32)]) -> std::collections::HashMap<String, u32> {
        entries.iter().map(|&(token, id)| (token.to_string(), id)).collect()
    }

    #[test]
    fn test_end_of_text_past_gapped_vocabulary() {
        let vocab = vocab_of(&[("a", 0), ("b", 7), ("c", 2)]);
        let tokenizer = Tokenizer::from_bpe(BpeTokenizer::from_vocab(vocab, Vec::new()));
        assert_eq!(tokenizer.end_of_text_token_id(), 8);
    }

    #[test]
    fn test_end_of_text_from_vocabulary_entry() {
        let vocab = vocab_of(&[("a", 0), (END_OF_TEXT, 5), ("b", 9)]);
        let tokenizer = Tokenizer::from_bpe(BpeTokenizer::from_vocab(vocab, Vec::new()));
        assert_eq!(tokenizer.end_of_text_token_id(), 5);
        assert_eq!(tokenizer.special_token_id(END_OF_TEXT).unwrap(), 5);

        let err = tokenizer.special_token_id("<|pad|>").unwrap_err();
        assert_eq!(
            err.downcast_ref::<TokenizerError>(),
            Some(&TokenizerError::UnknownToken("<|pad|>".to_string()))
        );
    }

    #[test]
    fn test_train_from_directory_reads_jsonl() {
        use std::fs;
        use tempfile::TempDir;

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(temp_dir.path().join("notes.txt"), "hello world hello rust")
            .expect("Failed to write txt");
        fs::write(
            temp_dir.path().join("qa.jsonl"),
            "{\"question\": \"what is rust\", \"answer\": \"a language\"}\n\n",
        )
        .expect("Failed to write jsonl");

        let tokenizer = Tokenizer::train_from_directory(temp_dir.path(), 500)
            .expect("Failed to train tokenizer from directory");

        let ids = tokenizer.encode("rust language").expect("Encoding failed");
        assert!(!ids.is_empty());
        assert!(tokenizer.vocab_size() > 0);
    }

    #[test]
    fn test_train_from_empty_directory_fails() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        assert!(Tokenizer::train_from_directory(temp_dir.path(), 500).is_err());
    }

    #[test]
    fn test_json_strings_order() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"a": "x", "b": ["y", 3, {"c": "z"}], "d": null}"#)
                .expect("valid json");
        assert_eq!(json_strings(&value), vec!["x", "y", "z"]);
    }
}
