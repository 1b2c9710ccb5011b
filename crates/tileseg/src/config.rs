//! Run configuration.
//!
//! Every section is a burn `Config`, so a run can be described by a JSON
//! file in which omitted fields take their defaults. The CLI then overrides
//! individual values.

use std::{fs, path::Path};

use burn::{
    config::Config,
    optim::{decay::WeightDecayConfig, AdamConfig},
};
use serde_json::Value;
use tileseg_data::{
    ColorJitter, IndexConfig, LoaderConfig, Split, SplitMode, TrainTransform, ValTransform,
};
use tileseg_model::{EncNetConfig, SegmentationLossConfig};

use crate::{
    checkpoint::EarlyStoppingConfig,
    error::{TrainingError, TrainingResult},
    schedule::StepLrConfig,
};

/// Where samples come from and how they are batched.
#[derive(Config, Debug)]
pub struct DataConfig {
    /// Dataset root holding `images/` and `masks/`.
    #[config(default = "String::from(\"training_data\")")]
    pub train_path: String,
    #[config(default = 16)]
    pub batch_size: usize,
    /// Keep `batch_trim * 16` samples when at least that many exist.
    #[config(default = "None")]
    pub batch_trim: Option<usize>,
    /// Restrict samples to the regions of this split.
    #[config(default = "None")]
    pub region_split: Option<Split>,
    #[config(default = 3)]
    pub num_workers: usize,
    /// Batches buffered per worker.
    #[config(default = 2)]
    pub prefetch: usize,
    #[config(default = 400)]
    pub crop_size: u32,
    /// Reflection border added before the random crop.
    #[config(default = 0)]
    pub padding: u32,
    /// Brightness, contrast, saturation and hue jitter strength.
    #[config(default = 0.25)]
    pub jitter: f32,
}

impl DataConfig {
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig::train(&self.train_path)
            .with_batch_trim(self.batch_trim)
            .with_region_split(self.region_split)
    }

    pub fn loader_config(&self, seed: u64, split: SplitMode) -> LoaderConfig {
        LoaderConfig {
            batch_size: self.batch_size,
            num_workers: self.num_workers,
            prefetch: self.prefetch,
            split,
            seed,
            train_transform: TrainTransform {
                crop_size: self.crop_size,
                padding: self.padding,
                jitter: ColorJitter::uniform(self.jitter),
            },
            val_transform: ValTransform {
                crop_size: self.crop_size,
            },
        }
    }
}

/// Adam with weight decay, stepped by a [`StepLr`](crate::schedule::StepLr).
#[derive(Config, Debug)]
pub struct OptimizerConfig {
    #[config(default = 5e-4)]
    pub weight_decay: f32,
    #[config(default = "StepLrConfig::new()")]
    pub schedule: StepLrConfig,
}

impl OptimizerConfig {
    /// Adam with this weight decay. A zero decay disables the penalty.
    pub fn adam(&self) -> AdamConfig {
        let decay = (self.weight_decay > 0.0).then(|| WeightDecayConfig::new(self.weight_decay));
        AdamConfig::new().with_weight_decay(decay)
    }
}

/// Everything a training run needs.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Suffix of the experiment name.
    #[config(default = "None")]
    pub name: Option<String>,
    #[config(default = 2)]
    pub num_epochs: usize,
    /// Batches per reported loss average.
    #[config(default = 5)]
    pub report_interval: usize,
    #[config(default = 1)]
    pub seed: u64,
    /// Directory that receives one subdirectory per experiment.
    #[config(default = "String::from(\"models\")")]
    pub artifact_dir: String,
    #[config(default = "DataConfig::new()")]
    pub data: DataConfig,
    #[config(default = "EncNetConfig::new()")]
    pub model: EncNetConfig,
    #[config(default = "SegmentationLossConfig::new()")]
    pub loss: SegmentationLossConfig,
    #[config(default = "OptimizerConfig::new()")]
    pub optimizer: OptimizerConfig,
    #[config(default = "EarlyStoppingConfig::new()")]
    pub early_stopping: EarlyStoppingConfig,
}

impl TrainingConfig {
    /// Read a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Io`] when the file cannot be read and
    /// [`TrainingError::Config`] when it is not a valid configuration.
    pub fn from_json_file(path: impl AsRef<Path>) -> TrainingResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TrainingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let invalid = |e: serde_json::Error| TrainingError::Config {
            reason: format!("{}: {e}", path.display()),
        };

        let overrides: Value = serde_json::from_str(&text).map_err(invalid)?;
        let mut merged = serde_json::to_value(Self::new()).map_err(invalid)?;
        merge_json(&mut merged, overrides);
        serde_json::from_value(merged).map_err(invalid)
    }

    /// Write the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Io`] when the file cannot be written.
    pub fn write_json_file(&self, path: impl AsRef<Path>) -> TrainingResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|e| TrainingError::Config {
            reason: e.to_string(),
        })?;
        fs::write(path, text).map_err(|source| TrainingError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Split used by the loaders: random when early stopping needs a
    /// validation set.
    pub const fn split_mode(&self) -> SplitMode {
        if self.early_stopping.enabled {
            SplitMode::Random { seed: self.seed }
        } else {
            SplitMode::None
        }
    }

    /// Reject values the training loop cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Config`] naming the first offending field.
    pub fn validate(&self) -> TrainingResult<()> {
        let checks = [
            (self.data.batch_size == 0, "data.batch_size must be at least 1"),
            (self.report_interval == 0, "report_interval must be at least 1"),
            (
                self.model.num_classes != self.loss.num_classes,
                "model.num_classes and loss.num_classes must match",
            ),
            (
                self.optimizer.schedule.initial.is_nan() || self.optimizer.schedule.initial <= 0.0,
                "optimizer.schedule.initial must be positive",
            ),
            (self.data.crop_size == 0, "data.crop_size must be at least 1"),
        ];

        match checks.into_iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(TrainingError::Config {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Overlay `overrides` onto `base`, descending into objects present in both.
fn merge_json(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
