use std::path::PathBuf;

use thiserror::Error;
use tileseg_data::DatasetError;
use tileseg_model::ModelError;

/// The error type for training runs.
#[derive(Error, Debug)]
pub enum TrainingError {
    /// The loss of a training batch was NaN or infinite.
    #[error("Training diverged at epoch {epoch}, batch {batch}: loss = {loss}")]
    TrainingDiverged {
        /// One-based epoch number.
        epoch: usize,
        /// One-based batch number within the epoch.
        batch: usize,
        /// The offending loss value.
        loss: f64,
    },

    /// A batch reached the loop without masks.
    #[error("Batch {batch} of epoch {epoch} has no masks to train against")]
    MissingTargets { epoch: usize, batch: usize },

    /// A validation batch carried no masks to score against.
    #[error("Validation batch {batch} has no masks to score against")]
    ValidationTargetsMissing { batch: usize },

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// A model record could not be written.
    #[error("Failed to save checkpoint {path}: {reason}")]
    Checkpoint {
        /// Destination of the record.
        path: PathBuf,
        /// Recorder error message.
        reason: String,
    },

    /// A directory or file next to the checkpoints could not be written.
    #[error("Failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Logically inconsistent training parameters.
    #[error("Invalid training configuration: {reason}")]
    Config { reason: String },
}

/// A specialized `Result` type for training operations.
pub type TrainingResult<T> = Result<T, TrainingError>;
