//! Configuration for packed supervised fine-tuning
//!
//! Settings are loaded from a JSON file; any section left out of the file
//! takes its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tunepack_data::{Formatter, InstructionFormatter, PackError, PackerConfig, Template, TextField};

/// Complete configuration loaded from file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfigFile {
    /// Packing settings
    #[serde(default)]
    pub packing: PackingConfig,
    /// Training loop settings
    #[serde(default)]
    pub training: TrainingHyperparams,
    /// Train/eval split settings
    #[serde(default)]
    pub split: SplitConfig,
}

/// How a record becomes text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatConfig {
    /// `{field}` template
    Template {
        /// Template text
        template: String,
    },
    /// One field used verbatim
    TextField {
        /// Field name
        field: String,
    },
    /// Instruction/input/output prompt layout
    Instruction,
}

impl Default for FormatConfig {
    fn default() -> Self {
        FormatConfig::Template {
            template: Template::question_answer().as_str().to_string(),
        }
    }
}

impl FormatConfig {
    /// Build the formatting function
    pub fn build(&self) -> Result<Box<dyn Formatter>> {
        Ok(match self {
            FormatConfig::Template { template } => Box::new(
                Template::new(template).context("Failed to parse formatting template")?,
            ),
            FormatConfig::TextField { field } => Box::new(TextField::new(field.clone())),
            FormatConfig::Instruction => Box::new(InstructionFormatter),
        })
    }
}

/// Packing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackingConfig {
    /// Tokens per packed window
    pub window_length: usize,
    /// Restart the training source instead of ending
    pub infinite: bool,
    /// Records tokenized per refill pass
    pub num_of_sequences: usize,
    /// Formatting function
    #[serde(default)]
    pub format: FormatConfig,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            window_length: 1024,
            infinite: true,
            num_of_sequences: 1024,
            format: FormatConfig::default(),
        }
    }
}

impl PackingConfig {
    /// Packer settings for the training set
    pub fn train_packer(&self) -> PackerConfig {
        PackerConfig::new(self.window_length)
            .infinite(self.infinite)
            .num_of_sequences(self.num_of_sequences)
    }

    /// Packer settings for the evaluation set, which is always finite
    pub fn eval_packer(&self) -> PackerConfig {
        self.train_packer().infinite(false)
    }
}

/// Training loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingHyperparams {
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

impl Default for TrainingHyperparams {
    fn default() -> Self {
        Self {
            batch_size: 4,
            gradient_accumulation_steps: 2,
            max_steps: 500,
            log_interval: 10,
            eval_interval: 200,
            eval_steps: 50,
            save_interval: 100,
        }
    }
}

/// Train/eval split settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of records held out for evaluation
    pub eval_fraction: f64,
    /// Shuffle seed
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            eval_fraction: 0.005,
            seed: 0,
        }
    }
}

impl Default for TrainingConfigFile {
    fn default() -> Self {
        Self {
            packing: PackingConfig::default(),
            training: TrainingHyperparams::default(),
            split: SplitConfig::default(),
        }
    }
}

impl TrainingConfigFile {
    /// Load configuration from a JSON file and validate it
    ///
    /// # Example
    /// ```no_run
    /// use tunepack_sft::config::TrainingConfigFile;
    /// use std::path::Path;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = TrainingConfigFile::from_file(Path::new("config.json"))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: TrainingConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.packing.train_packer().validate()?;
        self.packing.format.build()?;

        let training = &self.training;
        for (name, value) in [
            ("batch_size", training.batch_size),
            ("gradient_accumulation_steps", training.gradient_accumulation_steps),
            ("log_interval", training.log_interval),
        ] {
            if value == 0 {
                return Err(PackError::InvalidConfig(format!("{} must be > 0", name)).into());
            }
        }
        if training.eval_interval > 0 && training.eval_steps == 0 {
            return Err(PackError::InvalidConfig(
                "eval_steps must be > 0 when evaluation is enabled".to_string(),
            )
            .into());
        }

        let fraction = self.split.eval_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(PackError::InvalidConfig(format!(
                "eval_fraction must be in (0, 1), got {}",
                fraction
            ))
            .into());
        }
        Ok(())
    }
}
