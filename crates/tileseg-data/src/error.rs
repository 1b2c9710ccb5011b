//! Error types for indexing and loading tiles.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for dataset operations.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// A tile filename that does not follow `<prefix>_<x>_<y>_<suffix>`.
    #[error("Malformed tile filename {name}: {reason}")]
    MalformedFilename {
        /// The offending basename.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The overwrite filter removed every sample.
    #[error("Nothing to do: every sample already has an output in {out_dir}")]
    EmptyIndex {
        /// The output directory that was checked.
        out_dir: PathBuf,
    },

    /// Error when the image directory is not found.
    #[error("Image directory not found: {path}")]
    ImageDirectoryNotFound {
        /// The expected image directory path.
        path: PathBuf,
    },

    /// Error when the mask directory is not found.
    #[error("Mask directory not found: {path}")]
    MaskDirectoryNotFound {
        /// The expected mask directory path.
        path: PathBuf,
    },

    /// Error when reading a directory fails.
    #[error("Failed to read directory: {path}")]
    DirectoryReadFailed {
        /// The directory path that failed to read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Error when opening or decoding an image file fails.
    #[error("Failed to open image: {path}")]
    ImageOpenFailed {
        /// The image file path that failed to open.
        path: PathBuf,
        /// The underlying image processing error.
        #[source]
        source: image::ImageError,
    },

    /// Error when path components contain invalid UTF-8.
    #[error("Path contains invalid UTF-8: {path}")]
    InvalidUtf8Path {
        /// The path with invalid UTF-8.
        path: PathBuf,
    },

    /// Loader parameters that cannot produce batches.
    #[error("Invalid loader configuration: {reason}")]
    InvalidLoaderConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// A prefetch worker stopped before delivering its batch.
    #[error("Prefetch worker {worker} disconnected before batch {batch}")]
    WorkerDisconnected {
        /// Worker slot.
        worker: usize,
        /// Batch that was being waited on.
        batch: usize,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
