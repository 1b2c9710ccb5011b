//! # tileseg
//!
//! Training orchestration for tile segmentation: the epoch loop, the
//! learning-rate schedule, early stopping with checkpoints, run
//! configuration and the `train` command line.
//!
//! Data loading lives in [`tileseg_data`] and the network contract in
//! [`tileseg_model`]; both are re-exported as `data` and `model`.

pub mod backend;
pub mod checkpoint;
pub mod cli;
pub mod config;
mod error;
pub mod schedule;
pub mod training;

#[doc(inline)]
pub use checkpoint::{
    experiment_name, Decision, EarlyStopping, EarlyStoppingConfig, FileCheckpointer, ModelSaver,
    TrainingState,
};
#[doc(inline)]
pub use config::{DataConfig, OptimizerConfig, TrainingConfig};
#[doc(inline)]
pub use error::{TrainingError, TrainingResult};
#[doc(inline)]
pub use schedule::{ConstantLr, LrSchedule, StepLr, StepLrConfig};
#[doc(inline)]
pub use tileseg_data as data;
#[doc(inline)]
pub use tileseg_model as model;
#[doc(inline)]
pub use training::{run, train_epochs, validation_loss, LossWindow, RunSummary, TrainSettings};
