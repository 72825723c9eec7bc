//! Packing tools for supervised fine-tuning data
//!
//! # Usage
//!
//! ```bash
//! tunepack tokenizer --data ./records.jsonl --output ./tokenizer --vocab-size 8000
//! tunepack inspect --data ./records.jsonl [--tokenizer ./tokenizer]
//! tunepack pack --data ./records.jsonl --output ./packed.jsonl [--tokenizer ./tokenizer] [--limit 100]
//! ```
//!
//! `--config` points at a JSON training config whose `packing` section sets
//! the window length and formatting; defaults apply otherwise. Without
//! `--tokenizer` the character tokenizer is used.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tunepack_sft::commands;
use tunepack_sft::config::TrainingConfigFile;

/// Packing tools for supervised fine-tuning data
#[derive(Parser, Debug)]
#[command(name = "tunepack")]
#[command(about = "Constant-length sequence packing for fine-tuning data", long_about = None)]
struct Cli {
    /// Path to training configuration file
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a BPE tokenizer on formatted records
    Tokenizer {
        /// JSONL file or directory of JSONL files
        #[arg(long, value_name = "PATH")]
        data: PathBuf,

        /// Directory to write tokenizer.json to
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Target vocabulary size
        #[arg(long, default_value = "8000")]
        vocab_size: usize,
    },
    /// Print the character to token ratio and the first packed window
    Inspect {
        /// JSONL file or directory of JSONL files
        #[arg(long, value_name = "PATH")]
        data: PathBuf,

        /// Directory containing tokenizer.json
        #[arg(long, value_name = "PATH")]
        tokenizer: Option<PathBuf>,
    },
    /// Pack records once and write the windows as JSONL
    Pack {
        /// JSONL file or directory of JSONL files
        #[arg(long, value_name = "PATH")]
        data: PathBuf,

        /// Output JSONL file
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Directory containing tokenizer.json
        #[arg(long, value_name = "PATH")]
        tokenizer: Option<PathBuf>,

        /// Maximum number of windows to write
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tunepack=info".parse().context("Invalid log directive")?),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TrainingConfigFile::from_file(path).context("Failed to load config file")?,
        None => TrainingConfigFile::default(),
    };
    let packing = &config.packing;

    match cli.command {
        Command::Tokenizer {
            data,
            output,
            vocab_size,
        } => {
            let tokenizer = commands::train_tokenizer(&data, &output, vocab_size, packing)?;
            println!(
                "Saved tokenizer with {} tokens to {}",
                tokenizer.vocab_size(),
                output.display()
            );
        }
        Command::Inspect { data, tokenizer } => {
            let codec = commands::load_codec(tokenizer.as_deref())?;
            let inspection = commands::inspect(&data, codec.as_ref(), packing)?;
            println!("Characters per token: {:.2}", inspection.chars_per_token);
            match (inspection.first_window, inspection.decoded) {
                (Some(window), Some(text)) => {
                    println!("First window ({} tokens):", window.len());
                    println!("{:?}", window.input_ids);
                    println!("{}", text);
                }
                _ => println!(
                    "Data does not fill a single window of {} tokens",
                    packing.window_length
                ),
            }
        }
        Command::Pack {
            data,
            output,
            tokenizer,
            limit,
        } => {
            let codec = commands::load_codec(tokenizer.as_deref())?;
            let stats = commands::pack_to_jsonl(&data, &output, codec.as_ref(), packing, limit)?;
            println!(
                "Wrote {} windows from {} records ({} tokens, {} discarded) to {}",
                stats.windows,
                stats.records,
                stats.tokens,
                stats.discarded,
                output.display()
            );
        }
    }

    Ok(())
}
