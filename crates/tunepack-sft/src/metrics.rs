//! Training metrics logging

use std::time::Instant;

/// Training metrics for a single logged step
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingMetrics {
    /// Average loss over the logging window
    pub loss: f32,
    /// Throughput (tokens per second)
    pub throughput: f32,
    /// Tokens seen since training started
    pub tokens_seen: usize,
    /// Step number
    pub step: usize,
}

/// Metrics logger for training
///
/// Accumulates loss and token counts between log points and emits them as
/// `tracing` events every `log_interval` steps.
pub struct MetricsLogger {
    log_interval: usize,
    loss_sum: f32,
    loss_count: usize,
    window_tokens: usize,
    tokens_seen: usize,
    window_start: Instant,
    last: Option<TrainingMetrics>,
}

impl MetricsLogger {
    /// Create a new metrics logger
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
            loss_sum: 0.0,
            loss_count: 0,
            window_tokens: 0,
            tokens_seen: 0,
            window_start: Instant::now(),
            last: None,
        }
    }

    /// Record one optimizer step; returns the metrics when this step is logged
    pub fn log_step(&mut self, step: usize, loss: f32, tokens: usize) -> Option<TrainingMetrics> {
        self.loss_sum += loss;
        self.loss_count += 1;
        self.window_tokens += tokens;
        self.tokens_seen += tokens;

        if !step.is_multiple_of(self.log_interval) {
            return None;
        }

        let elapsed = self.window_start.elapsed().as_secs_f32();
        let throughput = if elapsed > 0.0 {
            self.window_tokens as f32 / elapsed
        } else {
            0.0
        };

        let metrics = TrainingMetrics {
            loss: self.loss_sum / self.loss_count as f32,
            throughput,
            tokens_seen: self.tokens_seen,
            step,
        };
        tracing::info!(
            step = metrics.step,
            loss = metrics.loss,
            tokens_per_sec = metrics.throughput,
            tokens_seen = metrics.tokens_seen,
            "train"
        );

        self.loss_sum = 0.0;
        self.loss_count = 0;
        self.window_tokens = 0;
        self.window_start = Instant::now();
        self.last = Some(metrics.clone());
        Some(metrics)
    }

    /// Tokens seen since training started
    pub fn tokens_seen(&self) -> usize {
        self.tokens_seen
    }

    /// Most recently logged metrics
    pub fn last(&self) -> Option<&TrainingMetrics> {
        self.last.as_ref()
    }
}
