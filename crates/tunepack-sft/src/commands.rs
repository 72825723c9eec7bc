//! Commands behind the `tunepack` binary

use crate::config::PackingConfig;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tunepack_data::{chars_token_ratio, JsonlSource, PackedWindow, PackerStats, SequencePacker};
use tunepack_tokenizer::{CharTokenizer, TextCodec, Tokenizer};

/// Records sampled when measuring the character to token ratio
pub const RATIO_SAMPLE_SIZE: usize = 400;

/// Load the BPE tokenizer in `dir`, or the character tokenizer when `None`
pub fn load_codec(dir: Option<&Path>) -> Result<Box<dyn TextCodec>> {
    match dir {
        Some(dir) => {
            let tokenizer = Tokenizer::from_directory(dir)
                .with_context(|| format!("Failed to load tokenizer from {:?}", dir))?;
            tracing::info!(vocab_size = tokenizer.vocab_size(), "loaded BPE tokenizer");
            Ok(Box::new(tokenizer))
        }
        None => {
            tracing::info!("no tokenizer given, using character tokenizer");
            Ok(Box::new(CharTokenizer))
        }
    }
}

/// Train a BPE tokenizer on formatted records and save it to `output`
pub fn train_tokenizer(
    data: &Path,
    output: &Path,
    vocab_size: usize,
    packing: &PackingConfig,
) -> Result<Tokenizer> {
    let formatter = packing.format.build()?;
    let records = JsonlSource::read_all(data)?;
    let texts = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            formatter
                .format(record)
                .with_context(|| format!("Failed to format record {}", i))
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(records = texts.len(), vocab_size, "training tokenizer");
    let tokenizer = Tokenizer::train_from_iterator(texts.iter(), vocab_size)?;
    tokenizer.save(output)?;
    tracing::info!(path = ?output, vocab_size = tokenizer.vocab_size(), "saved tokenizer");
    Ok(tokenizer)
}

/// What `inspect` found
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    /// Characters per token over the first records
    pub chars_per_token: f64,
    /// First packed window, if the data fills one
    pub first_window: Option<PackedWindow>,
    /// `first_window` decoded back to text
    pub decoded: Option<String>,
}

/// Measure the character to token ratio and peek at the first window
pub fn inspect(data: &Path, codec: &dyn TextCodec, packing: &PackingConfig) -> Result<Inspection> {
    let mut source = JsonlSource::open(data)?;
    let formatter = packing.format.build()?;
    let chars_per_token =
        chars_token_ratio(&mut source, formatter.as_ref(), codec, RATIO_SAMPLE_SIZE)?;

    let mut packer = SequencePacker::from_parts(
        codec,
        Box::new(source),
        formatter,
        packing.eval_packer(),
    )?;
    let first_window = packer.peek()?;
    let decoded = first_window
        .as_ref()
        .map(|window| codec.decode(&window.input_ids))
        .transpose()?;

    Ok(Inspection {
        chars_per_token,
        first_window,
        decoded,
    })
}

/// Pack the records in `data` once and write each window as a JSON line
///
/// At most `limit` windows are written when given.
pub fn pack_to_jsonl(
    data: &Path,
    output: &Path,
    codec: &dyn TextCodec,
    packing: &PackingConfig,
    limit: Option<usize>,
) -> Result<PackerStats> {
    let source = JsonlSource::open(data)?;
    let mut packer = SequencePacker::from_parts(
        codec,
        Box::new(source),
        packing.format.build()?,
        packing.eval_packer(),
    )?;

    let file = File::create(output)
        .with_context(|| format!("Failed to create output file: {:?}", output))?;
    let mut writer = BufWriter::new(file);

    let mut written = 0;
    while limit.is_none_or(|limit| written < limit) {
        let Some(window) = packer.next_window()? else {
            break;
        };
        serde_json::to_writer(&mut writer, &window).context("Failed to serialize window")?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write output file: {:?}", output))?;

    let stats = packer.stats();
    tracing::info!(
        windows = stats.windows,
        records = stats.records,
        tokens = stats.tokens,
        discarded = stats.discarded,
        path = ?output,
        "packed"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormatConfig;

    fn write_records(dir: &Path, count: usize) -> std::path::PathBuf {
        let lines: Vec<String> = (0..count)
            .map(|i| format!(r#"{{"text": "record number {}"}}"#, i))
            .collect();
        let path = dir.join("records.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn text_packing(window_length: usize) -> PackingConfig {
        PackingConfig {
            window_length,
            infinite: true,
            num_of_sequences: 4,
            format: FormatConfig::TextField {
                field: "text".to_string(),
            },
        }
    }

    #[test]
    fn test_inspect_with_char_codec() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = write_records(temp_dir.path(), 5);

        let inspection = inspect(&data, &CharTokenizer, &text_packing(8)).unwrap();
        assert!((inspection.chars_per_token - 1.0).abs() < f64::EPSILON);
        assert_eq!(inspection.decoded.as_deref(), Some("record n"));
    }

    #[test]
    fn test_inspect_short_data_has_no_window() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = write_records(temp_dir.path(), 1);

        let inspection = inspect(&data, &CharTokenizer, &text_packing(1000)).unwrap();
        assert!(inspection.first_window.is_none());
        assert!(inspection.decoded.is_none());
    }

    #[test]
    fn test_pack_to_jsonl_respects_limit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = write_records(temp_dir.path(), 10);
        let output = temp_dir.path().join("packed.jsonl");

        let stats = pack_to_jsonl(&data, &output, &CharTokenizer, &text_packing(8), Some(3)).unwrap();
        assert_eq!(stats.windows, 3);

        let content = std::fs::read_to_string(&output).unwrap();
        let windows: Vec<PackedWindow> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.len() == 8 && w.labels == w.input_ids));
    }

    #[test]
    fn test_load_codec_defaults_to_chars() {
        let codec = load_codec(None).unwrap();
        assert_eq!(codec.encode("ab").unwrap(), vec![97, 98]);
    }
}
