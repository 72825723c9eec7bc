//! Training loop for packed supervised fine-tuning
//!
//! The loop owns scheduling only: batching, gradient accumulation,
//! evaluation, logging and checkpointing of the data position. The model and
//! optimizer sit behind [`TrainStep`].

use crate::metrics::MetricsLogger;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tunepack_data::{Batch, Collator, PackerState, SequencePacker};

/// Model-side operations driven by the training loop
pub trait TrainStep {
    /// Forward and backward pass on one batch; returns the loss
    fn train_step(&mut self, batch: &Batch) -> Result<f32>;

    /// Apply accumulated gradients
    fn optimizer_step(&mut self) -> Result<()> {
        Ok(())
    }

    /// Forward pass without gradients; returns the loss
    fn eval_step(&mut self, batch: &Batch) -> Result<f32>;
}

/// Training configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingConfig {
    /// Windows per batch
    pub batch_size: usize,
    /// Batches per optimizer step
    pub gradient_accumulation_steps: usize,
    /// Optimizer steps to run
    pub max_steps: usize,
    /// Steps between logged metrics
    pub log_interval: usize,
    /// Steps between evaluations (0 = disabled)
    pub eval_interval: usize,
    /// Maximum batches per evaluation
    pub eval_steps: usize,
    /// Steps between checkpoints (0 = final checkpoint only)
    pub save_interval: usize,
}

impl From<&crate::config::TrainingHyperparams> for TrainingConfig {
    fn from(hp: &crate::config::TrainingHyperparams) -> Self {
        Self {
            batch_size: hp.batch_size,
            gradient_accumulation_steps: hp.gradient_accumulation_steps,
            max_steps: hp.max_steps,
            log_interval: hp.log_interval,
            eval_interval: hp.eval_interval,
            eval_steps: hp.eval_steps,
            save_interval: hp.save_interval,
        }
    }
}

/// Saved training position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerCheckpoint {
    /// Optimizer steps completed
    pub step: usize,
    /// Average loss of the last optimizer step
    pub loss: Option<f32>,
    /// Training packer position
    pub packer_state: PackerState,
}

impl TrainerCheckpoint {
    /// Write as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(self).context("Failed to serialize checkpoint")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write checkpoint: {:?}", path))
    }

    /// Read from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read checkpoint: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint: {:?}", path))
    }
}

/// Outcome of a training run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSummary {
    /// Optimizer steps completed, including resumed ones
    pub steps: usize,
    /// Average loss of the last optimizer step
    pub final_loss: Option<f32>,
    /// Tokens fed to the model in completed optimizer steps of this run
    pub tokens_seen: usize,
    /// `(step, loss)` for every evaluation
    pub eval_losses: Vec<(usize, f32)>,
    /// Checkpoint files written
    pub checkpoints: Vec<PathBuf>,
}

/// Run the training loop
///
/// # Arguments
/// * `model` - Model-side step implementation
/// * `train_packer` - Training windows; a finite packer is restarted at end of data
/// * `eval_packer` - Evaluation windows, reset before each evaluation
/// * `config` - Loop settings
/// * `output_dir` - Checkpoints go to `output_dir/checkpoints`
/// * `resume` - Checkpoint to continue from
pub fn train(
    model: &mut dyn TrainStep,
    train_packer: &mut SequencePacker<'_>,
    mut eval_packer: Option<&mut SequencePacker<'_>>,
    config: &TrainingConfig,
    output_dir: &Path,
    resume: Option<&Path>,
) -> Result<TrainingSummary> {
    if config.batch_size == 0 || config.gradient_accumulation_steps == 0 {
        anyhow::bail!("batch_size and gradient_accumulation_steps must be > 0");
    }

    let checkpoints_dir = output_dir.join("checkpoints");
    std::fs::create_dir_all(&checkpoints_dir).with_context(|| {
        format!(
            "Failed to create checkpoints directory: {:?}",
            checkpoints_dir
        )
    })?;

    let mut step = 0;
    if let Some(path) = resume {
        let checkpoint = TrainerCheckpoint::load(path)?;
        train_packer
            .restore_state(&checkpoint.packer_state)
            .context("Failed to restore packer state")?;
        step = checkpoint.step;
        tracing::info!(step, path = ?path, "resumed from checkpoint");
    }

    let collator = Collator::new(config.batch_size);
    let mut metrics_logger = MetricsLogger::new(config.log_interval);
    let mut summary = TrainingSummary::default();

    let mut accumulated_loss = 0.0;
    let mut accumulated_tokens = 0;
    let mut accumulation_count = 0;
    let mut last_loss = None;
    let mut restarted_without_data = false;

    while step < config.max_steps {
        let batch = match collator.next_batch(train_packer)? {
            Some(batch) => batch,
            None => {
                if restarted_without_data {
                    anyhow::bail!("Training data produced no packed windows");
                }
                tracing::info!(step, "training data exhausted, restarting");
                train_packer.reset()?;
                restarted_without_data = true;
                continue;
            }
        };
        restarted_without_data = false;

        let loss = model.train_step(&batch).context("Training step failed")?;
        accumulated_loss += loss;
        accumulation_count += 1;
        accumulated_tokens += batch.num_tokens();

        if accumulation_count < config.gradient_accumulation_steps {
            continue;
        }

        model.optimizer_step().context("Optimizer step failed")?;
        step += 1;
        let avg_loss = accumulated_loss / accumulation_count as f32;
        last_loss = Some(avg_loss);
        metrics_logger.log_step(step, avg_loss, accumulated_tokens);
        accumulated_loss = 0.0;
        accumulated_tokens = 0;
        accumulation_count = 0;

        if config.eval_interval > 0 && step.is_multiple_of(config.eval_interval) {
            if let Some(eval) = eval_packer.as_deref_mut() {
                if let Some(eval_loss) = evaluate(model, eval, &collator, config.eval_steps)? {
                    tracing::info!(step, eval_loss, "eval");
                    summary.eval_losses.push((step, eval_loss));
                }
            }
        }

        if config.save_interval > 0 && step.is_multiple_of(config.save_interval) {
            let path = checkpoints_dir.join(format!("checkpoint_{}.json", step));
            save_checkpoint(&path, step, last_loss, train_packer)?;
            summary.checkpoints.push(path);
        }
    }

    let final_path = checkpoints_dir.join("checkpoint_final.json");
    save_checkpoint(&final_path, step, last_loss, train_packer)?;
    summary.checkpoints.push(final_path);

    summary.steps = step;
    summary.final_loss = last_loss;
    summary.tokens_seen = metrics_logger.tokens_seen();
    tracing::info!(
        steps = step,
        tokens_seen = summary.tokens_seen,
        "training completed"
    );
    Ok(summary)
}

/// Mean loss over up to `max_batches` batches from a freshly reset packer
///
/// Returns `None` when the packer yields no batch.
pub fn evaluate(
    model: &mut dyn TrainStep,
    packer: &mut SequencePacker<'_>,
    collator: &Collator,
    max_batches: usize,
) -> Result<Option<f32>> {
    packer.reset().context("Failed to reset eval packer")?;

    let mut total = 0.0;
    let mut batches = 0;
    while batches < max_batches {
        let Some(batch) = collator.next_batch(packer)? else {
            break;
        };
        total += model.eval_step(&batch).context("Evaluation step failed")?;
        batches += 1;
    }

    if batches == 0 {
        return Ok(None);
    }
    Ok(Some(total / batches as f32))
}

fn save_checkpoint(
    path: &Path,
    step: usize,
    loss: Option<f32>,
    packer: &SequencePacker<'_>,
) -> Result<()> {
    TrainerCheckpoint {
        step,
        loss,
        packer_state: packer.state(),
    }
    .save(path)?;
    tracing::info!(step, path = ?path, "saved checkpoint");
    Ok(())
}
