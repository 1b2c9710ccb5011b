//! Sample loading and collation.
//!
//! Following burn's convention, the dataset yields raw float buffers and the
//! batcher creates tensors on the target device.

use std::marker::PhantomData;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Tensor, TensorData},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tileseg_model::SegBatch;

use crate::{
    error::{DatasetError, DatasetResult},
    index::Sample,
    transform::{PairedTransform, TransformedPair},
};

/// One loaded sample as raw data.
#[derive(Debug, Clone)]
pub struct SegItem {
    /// RGB values in `[0, 1]`, `[H, W, 3]` row-major.
    pub image: Vec<f32>,
    /// Mask values in `[0, 1]`, `[H, W]` row-major.
    pub mask: Option<Vec<f32>>,
    pub height: usize,
    pub width: usize,
    pub id: String,
}

impl From<(TransformedPair, String)> for SegItem {
    fn from((pair, id): (TransformedPair, String)) -> Self {
        let (width, height) = pair.image.dimensions();
        Self {
            image: pair.image.into_raw(),
            mask: pair.mask.map(|m| m.into_raw()),
            height: height as usize,
            width: width as usize,
            id,
        }
    }
}

/// The RNG used to augment sample `index` during loader pass `pass`.
pub fn sample_rng(seed: u64, pass: u64, index: usize) -> StdRng {
    let mixed = seed
        ^ pass.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
    StdRng::seed_from_u64(mixed)
}

/// Samples plus the transform applied when they are read.
#[derive(Debug, Clone)]
pub struct SegmentationDataset {
    samples: Vec<Sample>,
    transform: Option<PairedTransform>,
    seed: u64,
}

impl SegmentationDataset {
    pub const fn new(samples: Vec<Sample>, transform: Option<PairedTransform>, seed: u64) -> Self {
        Self {
            samples,
            transform,
            seed,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub const fn transform(&self) -> Option<&PairedTransform> {
        self.transform.as_ref()
    }

    /// Read and transform one sample.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::ImageOpenFailed`] when the image or mask cannot
    /// be decoded.
    pub fn load<R: Rng + ?Sized>(&self, sample: &Sample, rng: &mut R) -> DatasetResult<SegItem> {
        let image = open(&sample.image_path)?;
        let mask = sample.mask_path.as_deref().map(open).transpose()?;

        let pair = match &self.transform {
            Some(transform) => transform.apply(&image, mask.as_ref(), rng),
            None => TransformedPair::convert(&image, mask.as_ref()),
        };
        Ok(SegItem::from((pair, sample.id.clone())))
    }

    /// Load sample `index` with the augmentation RNG of loader pass `pass`.
    pub fn try_get(&self, index: usize, pass: u64) -> Option<DatasetResult<SegItem>> {
        let sample = self.samples.get(index)?;
        let mut rng = sample_rng(self.seed, pass, index);
        Some(self.load(sample, &mut rng))
    }
}

fn open(path: &std::path::Path) -> DatasetResult<image::DynamicImage> {
    image::open(path).map_err(|source| DatasetError::ImageOpenFailed {
        path: path.to_path_buf(),
        source,
    })
}

impl Dataset<SegItem> for SegmentationDataset {
    fn get(&self, index: usize) -> Option<SegItem> {
        match self.try_get(index, 0)? {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(index, error = %e, "failed to load sample");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Collates [`SegItem`]s into a [`SegBatch`].
///
/// Every item in a batch must share the same size. Masks are stacked only
/// when every item carries one.
#[derive(Clone, Default)]
pub struct SegBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> SegBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SegItem, SegBatch<B>> for SegBatcher<B> {
    fn batch(&self, items: Vec<SegItem>, device: &B::Device) -> SegBatch<B> {
        let with_masks = items.iter().all(|item| item.mask.is_some());

        let mut images = Vec::with_capacity(items.len());
        let mut masks = Vec::with_capacity(items.len());
        let mut ids = Vec::with_capacity(items.len());

        for item in items {
            let (height, width) = (item.height, item.width);
            let image = Tensor::<B, 3>::from_data(TensorData::new(item.image, [height, width, 3]), device)
                .permute([2, 0, 1]);
            images.push(image);

            if let (true, Some(mask)) = (with_masks, item.mask) {
                let mask = Tensor::<B, 2>::from_data(TensorData::new(mask, [height, width]), device)
                    .unsqueeze::<3>();
                masks.push(mask);
            }
            ids.push(item.id);
        }

        let masks = (with_masks && !masks.is_empty()).then(|| Tensor::stack(masks, 0));
        SegBatch::new(Tensor::stack(images, 0), masks, ids)
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use image::{GrayImage, RgbImage};

    use super::*;
    use crate::transform::ValTransform;

    type TestBackend = NdArray;

    fn item(id: &str, mask: bool) -> SegItem {
        SegItem {
            image: vec![0.5; 4 * 4 * 3],
            mask: mask.then(|| vec![1.0; 4 * 4]),
            height: 4,
            width: 4,
            id: id.into(),
        }
    }

    #[test]
    fn batcher_stacks_channels_first() {
        let device = Default::default();
        let batch = SegBatcher::<TestBackend>::new().batch(vec![item("a", true), item("b", true)], &device);

        assert_eq!(batch.images.dims(), [2, 3, 4, 4]);
        assert_eq!(batch.masks.as_ref().map(|m| m.dims()), Some([2, 1, 4, 4]));
        assert_eq!(batch.ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn batcher_drops_masks_for_test_items() {
        let device = Default::default();
        let batch = SegBatcher::<TestBackend>::new().batch(vec![item("a", false)], &device);
        assert!(batch.masks.is_none());
    }

    #[test]
    fn image_channels_survive_permute() {
        let device = Default::default();
        let mut raw = item("a", false);
        // Pixel (0, 0) is (0.1, 0.2, 0.3).
        raw.image[..3].copy_from_slice(&[0.1, 0.2, 0.3]);
        let batch = SegBatcher::<TestBackend>::new().batch(vec![raw], &device);

        let corner = batch
            .images
            .slice([0..1, 0..3, 0..1, 0..1])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(corner, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn dataset_reads_and_transforms_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("t_0_0_i.png");
        let mask_path = dir.path().join("t_0_0_mask.png");
        RgbImage::from_pixel(12, 10, image::Rgb([255, 0, 0]))
            .save(&image_path)
            .unwrap();
        GrayImage::from_pixel(12, 10, image::Luma([255]))
            .save(&mask_path)
            .unwrap();

        let sample = Sample {
            image_path,
            mask_path: Some(mask_path),
            id: "t_0_0_i".into(),
        };
        let transform = PairedTransform::Val(ValTransform { crop_size: 8 });
        let dataset = SegmentationDataset::new(vec![sample], Some(transform), 0);

        let item = dataset.get(0).expect("sample loads");
        assert_eq!((item.height, item.width), (8, 8));
        assert_eq!(&item.image[..3], &[1.0, 0.0, 0.0]);
        assert!(item.mask.unwrap().iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(dataset.get(1).is_none());
    }

    #[test]
    fn unreadable_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("broken.jpg");
        std::fs::write(&image_path, b"not an image").unwrap();
        let dataset = SegmentationDataset::new(
            vec![Sample {
                image_path,
                mask_path: None,
                id: "broken".into(),
            }],
            None,
            0,
        );

        let err = dataset.try_get(0, 0).unwrap().unwrap_err();
        assert!(matches!(err, DatasetError::ImageOpenFailed { .. }));
    }

    #[test]
    fn augmentation_rng_depends_on_pass_and_index() {
        let a: u64 = sample_rng(1, 0, 0).random();
        let b: u64 = sample_rng(1, 1, 0).random();
        let c: u64 = sample_rng(1, 0, 1).random();
        let again: u64 = sample_rng(1, 0, 0).random();

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
