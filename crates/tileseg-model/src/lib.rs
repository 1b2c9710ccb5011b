//! # tileseg-model
//!
//! Network-side building blocks for tileseg.
//!
//! ## Modules
//!
//! - `config`: The closed registry of ResNet backbones.
//! - `criterion`: The combined segmentation loss and the `Criterion` seam used
//!   by the training loop.
//! - `encnet`: The reference encoder/decoder network with encoding and
//!   auxiliary heads.
//! - `error`: Model construction errors.
//! - `resnet`: ResNet feature extractor.
//! - `training`: Batch and output types plus the `SegmentationModel` contract.

mod config;
mod criterion;
mod encnet;
mod error;
mod resnet;
pub mod training;

#[doc(inline)]
pub use config::Backbone;
#[doc(inline)]
pub use criterion::{Criterion, SegmentationLoss, SegmentationLossConfig};
#[doc(inline)]
pub use encnet::{EncNet, EncNetConfig, EncNetRecord};
#[doc(inline)]
pub use error::{ModelError, ModelResult};
#[doc(inline)]
pub use resnet::ResNet;
#[doc(inline)]
pub use training::{SegBatch, SegOutput, SegmentationModel};

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    pub type TestBackend = NdArray;

    pub type TestAutodiffBackend = Autodiff<TestBackend>;
}
