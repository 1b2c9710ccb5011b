//! Command-line interface of the `train` binary.
//!
//! Long flags are also accepted with a single dash (`-epochs 4`), which is
//! how existing run scripts invoke the trainer.

use std::{ffi::OsString, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use tileseg_model::Backbone;

use crate::{config::TrainingConfig, error::TrainingResult};

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(about = "Train a semantic-segmentation network on image/mask tiles")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train on every tile pair under the training root
    All(TrainArgs),
}

/// Flags of `train all`. Unset flags keep the configuration value.
#[derive(Args, Debug, Default)]
pub struct TrainArgs {
    /// JSON configuration file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Experiment name appended to the timestamp
    #[arg(long)]
    pub name: Option<String>,

    /// Number of epochs [default: 2]
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Batches between loss reports [default: 5]
    #[arg(long)]
    pub report: Option<usize>,

    /// Samples per training batch [default: 16]
    #[arg(long = "batch_size", alias = "batch-size")]
    pub batch_size: Option<usize>,

    /// Folder with `images/` and `masks/` subdirectories
    #[arg(long = "train_path", alias = "train-path")]
    pub train_path: Option<PathBuf>,

    /// Keep only `batch_trim * 16` samples
    #[arg(long = "batch_trim", alias = "batch-trim")]
    pub batch_trim: Option<usize>,

    /// Backbone of the reference network (resnet18 .. resnet152)
    #[arg(long)]
    pub backbone: Option<Backbone>,

    /// Seed for weights, shuffling and augmentation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Loader worker threads, 0 loads inline
    #[arg(long)]
    pub workers: Option<usize>,

    /// Hold out 20% of the samples and stop early on validation loss
    #[arg(long)]
    pub validate: bool,

    /// Non-improving epochs tolerated by early stopping
    #[arg(long)]
    pub patience: Option<usize>,
}

impl TrainArgs {
    /// The configuration file (or defaults) with every given flag applied.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file cannot be read or parsed.
    pub fn resolve(&self) -> TrainingResult<TrainingConfig> {
        let config = match &self.config {
            Some(path) => TrainingConfig::from_json_file(path)?,
            None => TrainingConfig::new(),
        };
        Ok(self.apply(config))
    }

    /// Override the fields of `config` that were given on the command line.
    pub fn apply(&self, mut config: TrainingConfig) -> TrainingConfig {
        if let Some(name) = &self.name {
            config.name = Some(name.clone());
        }
        if let Some(epochs) = self.epochs {
            config.num_epochs = epochs;
        }
        if let Some(report) = self.report {
            config.report_interval = report;
        }
        if let Some(batch_size) = self.batch_size {
            config.data.batch_size = batch_size;
        }
        if let Some(path) = &self.train_path {
            config.data.train_path = path.display().to_string();
        }
        if self.batch_trim.is_some() {
            config.data.batch_trim = self.batch_trim;
        }
        if let Some(backbone) = self.backbone {
            config.model.backbone = backbone;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(workers) = self.workers {
            config.data.num_workers = workers;
        }
        if self.validate {
            config.early_stopping.enabled = true;
        }
        if let Some(patience) = self.patience {
            config.early_stopping.patience = patience;
        }
        config
    }
}

/// Rewrite single-dash long flags (`-batch_size`) to their `--` form.
///
/// Short flags such as `-h`, negative numbers and everything after a bare
/// `--` are left alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            if passthrough {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                passthrough = true;
                return arg;
            }

            let mut chars = text.chars();
            let is_legacy = chars.next() == Some('-')
                && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.next().is_some();
            if is_legacy {
                OsString::from(format!("-{text}"))
            } else {
                arg
            }
        })
        .collect()
}
