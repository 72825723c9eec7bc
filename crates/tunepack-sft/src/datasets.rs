//! Building the train and eval packers from a record file

use crate::config::TrainingConfigFile;
use anyhow::{Context, Result};
use std::path::Path;
use tunepack_data::{
    chars_token_ratio, train_test_split, JsonlSource, MemorySource, SequencePacker,
};
use tunepack_tokenizer::TextCodec;

/// Packed training and evaluation datasets
pub struct PackedDatasets<'a> {
    /// Training packer (infinite unless configured otherwise)
    pub train: SequencePacker<'a>,
    /// Evaluation packer (always finite)
    pub eval: SequencePacker<'a>,
    /// Characters per token measured on the training records
    pub chars_per_token: f64,
}

/// Load records, split them and wrap both sides in packers
///
/// `data` is a `.jsonl` file or a directory of them.
pub fn create_datasets<'a>(
    tokenizer: &'a dyn TextCodec,
    data: &Path,
    config: &TrainingConfigFile,
) -> Result<PackedDatasets<'a>> {
    let records = JsonlSource::read_all(data)
        .with_context(|| format!("Failed to load records from {:?}", data))?;
    let total = records.len();
    let split = train_test_split(records, config.split.eval_fraction, config.split.seed)?;

    tracing::info!(
        total,
        train = split.train.len(),
        eval = split.eval.len(),
        "loaded records"
    );

    let mut train_source = MemorySource::new(split.train);
    let train_formatter = config.packing.format.build()?;
    let chars_per_token =
        chars_token_ratio(&mut train_source, train_formatter.as_ref(), tokenizer, 400)?;
    tracing::info!(chars_per_token, "measured character to token ratio");

    let train = SequencePacker::from_parts(
        tokenizer,
        Box::new(train_source),
        train_formatter,
        config.packing.train_packer(),
    )?;
    let eval = SequencePacker::from_parts(
        tokenizer,
        Box::new(MemorySource::new(split.eval)),
        config.packing.format.build()?,
        config.packing.eval_packer(),
    )?;

    Ok(PackedDatasets {
        train,
        eval,
        chars_per_token,
    })
}
