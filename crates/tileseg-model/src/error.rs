use thiserror::Error;

/// The error type for model construction.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A backbone name that is not in the registry.
    #[error("Unknown backbone: {name} (expected one of {expected})")]
    UnknownBackbone {
        /// The name that was requested.
        name: String,
        /// Comma separated list of supported names.
        expected: String,
    },

    /// Logically inconsistent model parameters.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },
}

/// A specialized `Result` type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
