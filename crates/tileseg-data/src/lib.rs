//! # tileseg-data
//!
//! Tile enumeration, paired augmentation and batch loading.
//!
//! - `region`: Geographic train/test partitioning by region id and skip zones.
//! - `transform`: Crops and colour jitter applied consistently to image/mask pairs.
//! - `index`: Enumeration of image/mask pairs with trimming and resumption.
//! - `dataset`: burn `Dataset` and `Batcher` implementations.
//! - `loader`: Random split and the bounded prefetching loader.

pub mod dataset;
mod error;
pub mod index;
pub mod loader;
pub mod region;
pub mod transform;

#[doc(inline)]
pub use dataset::{SegBatcher, SegItem, SegmentationDataset};
#[doc(inline)]
pub use error::{DatasetError, DatasetResult};
#[doc(inline)]
pub use index::{IndexConfig, Mode, Sample, SampleIndex};
#[doc(inline)]
pub use loader::{load, BatchIter, BatchLoader, LoaderConfig, Loaders, SplitMode};
#[doc(inline)]
pub use region::{classify, Region, RegionTable, SkipZone, Split};
#[doc(inline)]
pub use transform::{ColorJitter, PairedTransform, TrainTransform, ValTransform};
