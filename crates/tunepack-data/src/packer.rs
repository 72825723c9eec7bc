//! Constant-length sequence packing
//!
//! Turns a stream of variable-length records into fixed-length token windows:
//!
//! ```text
//! record 0 ─┐ format + encode
//! record 1 ─┤ ──────────────> [r0 tokens][EOT][r1 tokens][EOT][r2 ...
//! record 2 ─┘                  └── window 0 ──┘└── window 1 ──┘└─ ...
//! ```
//!
//! Tokens past a window boundary stay in the buffer and seed the next window,
//! so nothing is dropped or repeated except the final partial window of a
//! finite pass.

use crate::error::PackError;
use crate::format::Formatter;
use crate::record::RawRecord;
use crate::source::RecordSource;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tunepack_tokenizer::TextCodec;

/// Packer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackerConfig {
    /// Tokens per emitted window
    pub window_length: usize,
    /// Restart the source when it runs out instead of ending
    pub infinite: bool,
    /// Records tokenized per refill pass; throughput only
    pub num_of_sequences: usize,
}

impl PackerConfig {
    /// Finite packing with the default refill size
    pub fn new(window_length: usize) -> Self {
        Self {
            window_length,
            infinite: false,
            num_of_sequences: 1024,
        }
    }

    /// Set infinite mode
    pub fn infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }

    /// Set the refill size
    pub fn num_of_sequences(mut self, num_of_sequences: usize) -> Self {
        self.num_of_sequences = num_of_sequences;
        self
    }

    /// Reject settings the packer cannot run with
    pub fn validate(&self) -> Result<(), PackError> {
        if self.window_length == 0 {
            return Err(PackError::InvalidWindowLength(self.window_length));
        }
        if self.num_of_sequences == 0 {
            return Err(PackError::InvalidConfig(
                "num_of_sequences must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// One fixed-length training window
///
/// Labels equal inputs: the next-token shift happens in the loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedWindow {
    /// Token IDs, exactly `window_length` long
    pub input_ids: Vec<u32>,
    /// Copy of `input_ids`
    pub labels: Vec<u32>,
}

impl PackedWindow {
    fn new(input_ids: Vec<u32>) -> Self {
        let labels = input_ids.clone();
        Self { input_ids, labels }
    }

    /// Window length in tokens
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// True for a zero-length window (never produced by a packer)
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Packer position for checkpointing
///
/// Restoring it reproduces the exact window stream that would have followed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackerState {
    /// Records consumed from the source since the last restart
    pub cursor: usize,
    /// Completed passes over the source (infinite mode)
    pub epoch: usize,
    /// Tokens buffered but not yet emitted
    pub buffer: Vec<u32>,
    /// Source ran out during a finite pass
    pub exhausted: bool,
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackerStats {
    /// Windows handed to the caller
    pub windows: usize,
    /// Records pulled from the source
    pub records: usize,
    /// Tokens appended to the buffer, boundary tokens included
    pub tokens: usize,
    /// Tokens thrown away as a final partial window
    pub discarded: usize,
    /// Times the source was restarted in infinite mode
    pub restarts: usize,
}

/// Streaming constant-length packer
///
/// Pull-based and single-threaded: every [`next_window`](Self::next_window)
/// call does the tokenization needed for one window. The tokenizer is
/// borrowed; source, formatter and buffer are owned.
pub struct SequencePacker<'a> {
    tokenizer: &'a dyn TextCodec,
    source: Box<dyn RecordSource + 'a>,
    formatter: Box<dyn Formatter + 'a>,
    config: PackerConfig,
    buffer: VecDeque<u32>,
    cursor: usize,
    epoch: usize,
    exhausted: bool,
    stats: PackerStats,
}

impl<'a> SequencePacker<'a> {
    /// Create a packer
    ///
    /// # Errors
    /// Fails with [`PackError::InvalidWindowLength`] for a zero window and
    /// [`PackError::InvalidConfig`] for a zero refill size.
    pub fn new(
        tokenizer: &'a dyn TextCodec,
        source: impl RecordSource + 'a,
        formatter: impl Formatter + 'a,
        config: PackerConfig,
    ) -> Result<Self> {
        Self::from_parts(tokenizer, Box::new(source), Box::new(formatter), config)
    }

    /// Create a packer from already boxed collaborators
    pub fn from_parts(
        tokenizer: &'a dyn TextCodec,
        source: Box<dyn RecordSource + 'a>,
        formatter: Box<dyn Formatter + 'a>,
        config: PackerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tokenizer,
            source,
            formatter,
            config,
            buffer: VecDeque::with_capacity(config.window_length * 2),
            cursor: 0,
            epoch: 0,
            exhausted: false,
            stats: PackerStats::default(),
        })
    }

    /// Produce the next packed window
    ///
    /// Returns `Ok(None)` once a finite source is exhausted and fewer than
    /// `window_length` tokens remain; the remainder is discarded. Formatting
    /// and tokenization errors abort the call and are returned as-is.
    pub fn next_window(&mut self) -> Result<Option<PackedWindow>> {
        let window_length = self.config.window_length;

        while self.buffer.len() < window_length && !self.exhausted {
            self.refill()?;
        }

        if self.buffer.len() >= window_length {
            let ids: Vec<u32> = self.buffer.drain(..window_length).collect();
            self.stats.windows += 1;
            return Ok(Some(PackedWindow::new(ids)));
        }

        if !self.buffer.is_empty() {
            tracing::debug!(
                discarded = self.buffer.len(),
                window_length,
                "dropping final partial window"
            );
            self.stats.discarded += self.buffer.len();
            self.buffer.clear();
        }
        Ok(None)
    }

    /// One refill pass: pull up to `num_of_sequences` records into the buffer
    fn refill(&mut self) -> Result<()> {
        let eot = self.tokenizer.end_of_text_token_id();
        let mut pulled = 0;

        while pulled < self.config.num_of_sequences {
            let Some(record) = self.source.next_record()? else {
                if !self.config.infinite {
                    self.exhausted = true;
                    break;
                }
                // Nothing pulled since the last restart: the source is empty.
                if self.cursor == 0 {
                    return Err(PackError::EmptySource.into());
                }
                self.source.reset().context("Failed to restart record source")?;
                self.cursor = 0;
                self.epoch += 1;
                self.stats.restarts += 1;
                tracing::debug!(epoch = self.epoch, "record source restarted");
                continue;
            };

            let ids = match self.encode_record(&record) {
                Ok(ids) => ids,
                Err(err) => {
                    // Leave the failing record as the next pull so the
                    // source stays in step with the cursor.
                    self.source
                        .seek(self.cursor)
                        .context("Failed to rewind record source after error")?;
                    return Err(err);
                }
            };

            self.stats.tokens += ids.len() + 1;
            self.buffer.extend(ids);
            self.buffer.push_back(eot);
            self.cursor += 1;
            self.stats.records += 1;
            pulled += 1;
        }

        tracing::debug!(
            records = pulled,
            buffered = self.buffer.len(),
            cursor = self.cursor,
            "refill pass complete"
        );
        Ok(())
    }

    fn encode_record(&self, record: &RawRecord) -> Result<Vec<u32>> {
        let text = self
            .formatter
            .format(record)
            .with_context(|| format!("Failed to format record {}", self.cursor))?;
        self.tokenizer
            .encode(&text)
            .with_context(|| format!("Failed to tokenize record {}", self.cursor))
    }

    /// Move the iteration cursor to `position` and clear the buffer
    ///
    /// The epoch counter keeps counting; [`reset`](Self::reset) clears it.
    pub fn reset_cursor(&mut self, position: usize) -> Result<()> {
        self.source
            .seek(position)
            .with_context(|| format!("Failed to seek record source to {}", position))?;
        self.cursor = position;
        self.buffer.clear();
        self.exhausted = false;
        Ok(())
    }

    /// Restart from the first record
    ///
    /// Followed by `k` windows, this yields exactly what a freshly built
    /// packer would yield, and [`state`](Self::state) matches a fresh packer.
    pub fn reset(&mut self) -> Result<()> {
        self.reset_cursor(0)?;
        self.epoch = 0;
        Ok(())
    }

    /// Look at the next window without consuming it
    ///
    /// Snapshots the state, produces a window and restores the snapshot, so a
    /// following [`next_window`](Self::next_window) returns the same window.
    /// Counters are left untouched.
    pub fn peek(&mut self) -> Result<Option<PackedWindow>> {
        let snapshot = self.state();
        let stats = self.stats;
        let window = self.next_window();
        self.restore_state(&snapshot)?;
        self.stats = stats;
        window
    }

    /// Current position, for checkpointing
    pub fn state(&self) -> PackerState {
        PackerState {
            cursor: self.cursor,
            epoch: self.epoch,
            buffer: self.buffer.iter().copied().collect(),
            exhausted: self.exhausted,
        }
    }

    /// Resume from a saved position
    pub fn restore_state(&mut self, state: &PackerState) -> Result<()> {
        self.source
            .seek(state.cursor)
            .with_context(|| format!("Failed to seek record source to {}", state.cursor))?;
        self.cursor = state.cursor;
        self.epoch = state.epoch;
        self.buffer = state.buffer.iter().copied().collect();
        self.exhausted = state.exhausted;
        Ok(())
    }

    /// Records consumed since the last restart
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Completed passes over the source
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Tokens waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Running counters
    pub fn stats(&self) -> PackerStats {
        self.stats
    }

    /// Packer settings
    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    /// Window length in tokens
    pub fn window_length(&self) -> usize {
        self.config.window_length
    }

    /// Tokenizer this packer encodes with
    pub fn tokenizer(&self) -> &'a dyn TextCodec {
        self.tokenizer
    }
}

impl Iterator for SequencePacker<'_> {
    type Item = Result<PackedWindow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_window().transpose()
    }
}
