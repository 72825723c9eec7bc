//! Upstream record sources
//!
//! A source hands out records one at a time, reports exhaustion with
//! `Ok(None)` and can be repositioned. Repositioning is what lets a packer
//! restart in infinite mode and resume from a checkpoint.

use crate::error::PackError;
use crate::record::RawRecord;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Sequential, restartable reader of raw records
pub trait RecordSource {
    /// Next record, or `None` once the source is exhausted
    fn next_record(&mut self) -> Result<Option<RawRecord>>;

    /// Position the source so the next record returned is record `position`
    fn seek(&mut self, position: usize) -> Result<()>;

    /// Restart from the first record
    fn reset(&mut self) -> Result<()> {
        self.seek(0)
    }

    /// Total number of records, when known without reading the source
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn next_record(&mut self) -> Result<Option<RawRecord>> {
        (**self).next_record()
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        (**self).seek(position)
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }
}

/// In-memory record source
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<RawRecord>,
    pos: usize,
}

impl MemorySource {
    /// Serve records in the given order
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records, pos: 0 }
    }

    /// Serve records in an order shuffled once with `seed`
    ///
    /// The order is fixed at construction, so restarts and seeks replay the
    /// same sequence.
    pub fn shuffled(mut records: Vec<RawRecord>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        records.shuffle(&mut rng);
        Self::new(records)
    }

    /// Records in serving order
    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl From<Vec<RawRecord>> for MemorySource {
    fn from(records: Vec<RawRecord>) -> Self {
        Self::new(records)
    }
}

impl RecordSource for MemorySource {
    fn next_record(&mut self) -> Result<Option<RawRecord>> {
        let record = self.records.get(self.pos).cloned();
        if record.is_some() {
            self.pos += 1;
        }
        Ok(record)
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.records.len() {
            return Err(PackError::SeekOutOfRange {
                position,
                len: self.records.len(),
            }
            .into());
        }
        self.pos = position;
        Ok(())
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.records.len())
    }
}

/// Streaming reader over JSON Lines files
///
/// Each non-blank line holds one JSON object. Files are read lazily, one line
/// at a time, in sorted path order. Seeking re-opens the files and skips
/// forward.
pub struct JsonlSource {
    files: Vec<PathBuf>,
    file_idx: usize,
    lines: Option<Lines<BufReader<fs::File>>>,
    line_num: usize,
    pos: usize,
}

impl JsonlSource {
    /// Open a `.jsonl` file, or every `.jsonl` file inside a directory
    pub fn open(path: &Path) -> Result<Self> {
        let files = if path.is_dir() {
            let mut files = Vec::new();
            let entries = fs::read_dir(path)
                .with_context(|| format!("Failed to read data directory: {:?}", path))?;
            for entry in entries {
                let entry = entry.context("Failed to read directory entry")?;
                let file = entry.path();
                if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                    files.push(file);
                }
            }
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            anyhow::bail!("Data path does not exist: {:?}", path);
        };

        tracing::debug!(files = files.len(), path = ?path, "opened jsonl source");

        Ok(Self {
            files,
            file_idx: 0,
            lines: None,
            line_num: 0,
            pos: 0,
        })
    }

    /// Files backing this source, in reading order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of records handed out since the last seek to zero
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read every record into memory
    pub fn read_all(path: &Path) -> Result<Vec<RawRecord>> {
        let mut source = Self::open(path)?;
        let mut records = Vec::new();
        while let Some(record) = source.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    fn rewind(&mut self) {
        self.file_idx = 0;
        self.lines = None;
        self.line_num = 0;
        self.pos = 0;
    }
}

impl RecordSource for JsonlSource {
    fn next_record(&mut self) -> Result<Option<RawRecord>> {
        loop {
            if self.lines.is_none() {
                let Some(path) = self.files.get(self.file_idx) else {
                    return Ok(None);
                };
                let file = fs::File::open(path)
                    .with_context(|| format!("Failed to open file: {:?}", path))?;
                self.lines = Some(BufReader::new(file).lines());
                self.line_num = 0;
            }

            let next_line = self.lines.as_mut().and_then(|lines| lines.next());
            let Some(line) = next_line else {
                self.lines = None;
                self.file_idx += 1;
                continue;
            };

            self.line_num += 1;
            let path = &self.files[self.file_idx];
            let line = line.with_context(|| format!("Failed to read line in {:?}", path))?;
            if line.trim().is_empty() {
                continue;
            }

            let record = RawRecord::from_json_str(&line).with_context(|| {
                format!("Failed to parse record at line {} in {:?}", self.line_num, path)
            })?;
            self.pos += 1;
            return Ok(Some(record));
        }
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.rewind();
        while self.pos < position {
            if self.next_record()?.is_none() {
                let len = self.pos;
                self.rewind();
                return Err(PackError::SeekOutOfRange { position, len }.into());
            }
        }
        Ok(())
    }
}
