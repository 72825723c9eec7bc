//! Collation of packed windows into batch tensors

use crate::packer::{PackedWindow, SequencePacker};
use anyhow::Result;
use aprender::autograd::Tensor;

/// A batch of packed windows
///
/// Both tensors have shape `[rows, window_length]`; token IDs are stored as
/// `f32` the way the training stack consumes them.
pub struct Batch {
    /// Input token IDs
    pub input_ids: Tensor,
    /// Labels, equal to the inputs
    pub labels: Tensor,
    /// Number of windows in the batch
    pub rows: usize,
    /// Tokens per window
    pub window_length: usize,
}

impl Batch {
    /// Tokens in the batch
    pub fn num_tokens(&self) -> usize {
        self.rows * self.window_length
    }
}

/// Groups windows into batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collator {
    batch_size: usize,
    drop_last: bool,
}

impl Collator {
    /// Batches of `batch_size` windows; a short final batch is kept
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            drop_last: false,
        }
    }

    /// Drop a final batch holding fewer than `batch_size` windows
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Windows per full batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Stack windows into a batch
    ///
    /// # Errors
    /// Fails on an empty slice or on windows of differing lengths.
    pub fn collate(&self, windows: &[PackedWindow]) -> Result<Batch> {
        let Some(first) = windows.first() else {
            anyhow::bail!("Cannot collate an empty list of windows");
        };
        let window_length = first.len();

        let mut inputs_data = Vec::with_capacity(windows.len() * window_length);
        let mut labels_data = Vec::with_capacity(windows.len() * window_length);
        for (i, window) in windows.iter().enumerate() {
            if window.len() != window_length || window.labels.len() != window_length {
                anyhow::bail!(
                    "Window {} has length {}, expected {}",
                    i,
                    window.len(),
                    window_length
                );
            }
            inputs_data.extend(window.input_ids.iter().map(|&id| id as f32));
            labels_data.extend(window.labels.iter().map(|&id| id as f32));
        }

        let rows = windows.len();
        Ok(Batch {
            input_ids: Tensor::new(&inputs_data, &[rows, window_length]),
            labels: Tensor::new(&labels_data, &[rows, window_length]),
            rows,
            window_length,
        })
    }

    /// Pull up to `batch_size` windows from a packer and collate them
    ///
    /// Returns `Ok(None)` when the packer has nothing left, or when only a
    /// short batch is left and `drop_last` is set.
    pub fn next_batch(&self, packer: &mut SequencePacker<'_>) -> Result<Option<Batch>> {
        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be > 0");
        }

        let mut windows = Vec::with_capacity(self.batch_size);
        while windows.len() < self.batch_size {
            match packer.next_window()? {
                Some(window) => windows.push(window),
                None => break,
            }
        }

        if windows.is_empty() || (self.drop_last && windows.len() < self.batch_size) {
            return Ok(None);
        }
        self.collate(&windows).map(Some)
    }
}
