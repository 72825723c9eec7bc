//! Constant-length sequence packing for supervised fine-tuning
//!
//! This crate turns labeled text records into fixed-length token windows:
//! - [`record`]: raw records read from JSON
//! - [`source`]: restartable record sources (in-memory, JSON Lines)
//! - [`format`]: formatting functions producing prompt+completion text
//! - [`packer`]: the streaming [`SequencePacker`]
//! - [`collate`]: batching windows into tensors
//! - [`split`] and [`stats`]: dataset preparation helpers
//!
//! # Example
//!
//! ```no_run
//! use tunepack_data::{MemorySource, PackerConfig, RawRecord, SequencePacker, Template};
//! use tunepack_tokenizer::CharTokenizer;
//!
//! # fn main() -> anyhow::Result<()> {
//! let records = vec![RawRecord::new().with("question", "A").with("answer", "B")];
//! let mut packer = SequencePacker::new(
//!     &CharTokenizer,
//!     MemorySource::new(records),
//!     Template::question_answer(),
//!     PackerConfig::new(8),
//! )?;
//! while let Some(window) = packer.next_window()? {
//!     assert_eq!(window.input_ids.len(), 8);
//! }
//! # Ok(())
//! # }
//! ```

pub mod collate;
pub mod error;
pub mod format;
pub mod packer;
pub mod record;
pub mod source;
pub mod split;
pub mod stats;

pub use collate::{Batch, Collator};
pub use error::PackError;
pub use format::{Formatter, InstructionFormatter, Template, TextField};
pub use packer::{PackedWindow, PackerConfig, PackerState, PackerStats, SequencePacker};
pub use record::RawRecord;
pub use source::{JsonlSource, MemorySource, RecordSource};
pub use split::{train_test_split, DatasetSplit};
pub use stats::chars_token_ratio;
