//! Batch and output types shared by the data pipeline and the training loop.
//!
//! They live in the model crate so that `tileseg-data` can build batches
//! without depending on the trainer.

use burn::{prelude::*, tensor::backend::AutodiffBackend};

/// A collated batch of transformed samples.
#[derive(Debug, Clone)]
pub struct SegBatch<B: Backend> {
    /// Images with shape `[N, 3, H, W]`.
    pub images: Tensor<B, 4>,
    /// Masks with shape `[N, 1, H, W]`, absent for test-mode batches.
    pub masks: Option<Tensor<B, 4>>,
    /// Sample identifiers in batch order.
    pub ids: Vec<String>,
}

impl<B: Backend> SegBatch<B> {
    /// Create a new batch.
    pub const fn new(images: Tensor<B, 4>, masks: Option<Tensor<B, 4>>, ids: Vec<String>) -> Self {
        Self { images, masks, ids }
    }

    /// Number of samples in the batch.
    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }

    /// Integer class labels `[N, H, W]` derived from the mask.
    ///
    /// Mask values are rounded first so interpolation noise from cropping
    /// does not produce fractional labels.
    pub fn targets(&self) -> Option<Tensor<B, 3, Int>> {
        self.masks
            .as_ref()
            .map(|masks| masks.clone().round().int().squeeze::<3>(1))
    }

    /// Move every tensor of the batch to `device`.
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            images: self.images.to_device(device),
            masks: self.masks.map(|m| m.to_device(device)),
            ids: self.ids,
        }
    }
}

impl<B: AutodiffBackend> SegBatch<B> {
    /// Detach the batch for evaluation on the inner backend.
    pub fn inner(self) -> SegBatch<B::InnerBackend> {
        SegBatch {
            images: self.images.inner(),
            masks: self.masks.map(Tensor::inner),
            ids: self.ids,
        }
    }
}

/// Output of a segmentation forward pass.
#[derive(Debug, Clone)]
pub struct SegOutput<B: Backend> {
    /// Per-pixel class scores `[N, C, H, W]` at input resolution.
    pub primary: Tensor<B, 4>,
    /// Image-level class presence logits `[N, C]` from the encoding head.
    pub se: Option<Tensor<B, 2>>,
    /// Auxiliary per-pixel scores, each `[N, C, H, W]`.
    pub aux: Vec<Tensor<B, 4>>,
}

impl<B: Backend> SegOutput<B> {
    /// Output with a primary map only.
    pub const fn primary(primary: Tensor<B, 4>) -> Self {
        Self {
            primary,
            se: None,
            aux: Vec::new(),
        }
    }
}

/// The contract every trainable segmentation network satisfies.
///
/// Device transfer and parameter freezing are provided by burn's `Module`
/// (`fork` and `no_grad`).
pub trait SegmentationModel<B: Backend>: Module<B> {
    /// Run the network on a `[N, 3, H, W]` batch.
    fn forward(&self, images: Tensor<B, 4>) -> SegOutput<B>;
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Tensor, TensorData};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn targets_round_noisy_mask_values() {
        let device = Default::default();
        let masks = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.02f32, 0.97, 0.49, 0.51], [1, 1, 2, 2]),
            &device,
        );
        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 2, 2], &device);
        let batch = SegBatch::new(images, Some(masks), vec!["a".into()]);

        let targets = batch.targets().expect("mask present");
        assert_eq!(targets.dims(), [1, 2, 2]);
        let values = targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(values, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_batches_have_no_targets() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 4, 4], &device);
        let batch = SegBatch::new(images, None, vec!["x".into(), "y".into()]);

        assert_eq!(batch.batch_size(), 2);
        assert!(batch.targets().is_none());
    }
}
