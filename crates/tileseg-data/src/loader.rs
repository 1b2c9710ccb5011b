//! Bounded, multi-threaded batch loader.
//!
//! Batch `j` of a pass is loaded by worker `j % num_workers`. Each worker
//! owns a bounded channel and the consumer reads the channels round-robin,
//! so batches arrive in a fixed order no matter how fast each worker is.
//! Collation into tensors happens on the consuming thread.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use burn::{data::dataloader::batcher::Batcher, tensor::backend::Backend};
use crossbeam_channel::{bounded, Receiver};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tileseg_model::SegBatch;

use crate::{
    dataset::{SegBatcher, SegItem, SegmentationDataset},
    error::{DatasetError, DatasetResult},
    index::{Sample, SampleIndex},
    transform::{PairedTransform, TrainTransform, ValTransform},
};

/// How the index is partitioned into loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// One shuffled loader over every sample, without augmentation.
    None,
    /// Seeded 80/20 train/validation partition.
    Random { seed: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Worker threads. Zero loads on the consuming thread.
    pub num_workers: usize,
    /// Batches buffered per worker.
    pub prefetch: usize,
    pub split: SplitMode,
    /// Seed for shuffling and augmentation.
    pub seed: u64,
    pub train_transform: TrainTransform,
    pub val_transform: ValTransform,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            num_workers: 3,
            prefetch: 2,
            split: SplitMode::None,
            seed: 42,
            train_transform: TrainTransform::default(),
            val_transform: ValTransform::default(),
        }
    }
}

/// The loaders produced by [`load`].
pub struct Loaders<B: Backend> {
    pub train: BatchLoader<B>,
    /// Present for [`SplitMode::Random`].
    pub val: Option<BatchLoader<B>>,
}

/// Partition `index` and wrap each part in a [`BatchLoader`].
///
/// # Errors
///
/// Returns [`DatasetError::InvalidLoaderConfiguration`] for a zero batch size.
pub fn load<B: Backend>(
    index: SampleIndex,
    config: &LoaderConfig,
    device: &B::Device,
) -> DatasetResult<Loaders<B>> {
    if config.batch_size == 0 {
        return Err(DatasetError::InvalidLoaderConfiguration {
            reason: "batch_size must be at least 1".into(),
        });
    }

    let loader = |samples: Vec<Sample>,
                  transform: Option<PairedTransform>,
                  batch_size: usize,
                  shuffle: bool| {
        let dataset = SegmentationDataset::new(samples, transform, config.seed);
        BatchLoader::new(dataset, batch_size, shuffle, config, device.clone())
    };

    match config.split {
        SplitMode::None => {
            tracing::info!(samples = index.len(), batch_size = config.batch_size, "single loader");
            Ok(Loaders {
                train: loader(index.into_samples(), None, config.batch_size, true),
                val: None,
            })
        }
        SplitMode::Random { seed } => {
            let mut samples = index.into_samples();
            samples.shuffle(&mut StdRng::seed_from_u64(seed));
            // floor(0.8 * N) for training.
            let train_len = samples.len() * 4 / 5;
            let val_samples = samples.split_off(train_len);
            let val_batch = (config.batch_size / 4).max(1);

            tracing::info!(
                train = samples.len(),
                val = val_samples.len(),
                batch_size = config.batch_size,
                val_batch_size = val_batch,
                "random split"
            );
            Ok(Loaders {
                train: loader(
                    samples,
                    Some(PairedTransform::Train(config.train_transform.clone())),
                    config.batch_size,
                    true,
                ),
                val: Some(loader(
                    val_samples,
                    Some(PairedTransform::Val(config.val_transform.clone())),
                    val_batch,
                    false,
                )),
            })
        }
    }
}

/// Restartable source of batches over one dataset.
///
/// Every call to [`BatchLoader::iter`] starts a new pass that yields each
/// sample exactly once. Shuffled loaders draw a new order per pass.
pub struct BatchLoader<B: Backend> {
    dataset: Arc<SegmentationDataset>,
    batcher: SegBatcher<B>,
    device: B::Device,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    num_workers: usize,
    prefetch: usize,
    pass: AtomicU64,
}

impl<B: Backend> BatchLoader<B> {
    pub fn new(
        dataset: SegmentationDataset,
        batch_size: usize,
        shuffle: bool,
        config: &LoaderConfig,
        device: B::Device,
    ) -> Self {
        Self {
            dataset: Arc::new(dataset),
            batcher: SegBatcher::new(),
            device,
            batch_size: batch_size.max(1),
            shuffle,
            seed: config.seed,
            num_workers: config.num_workers,
            prefetch: config.prefetch.max(1),
            pass: AtomicU64::new(0),
        }
    }

    /// Samples per pass.
    pub fn num_samples(&self) -> usize {
        self.dataset.samples().len()
    }

    pub fn num_batches(&self) -> usize {
        self.num_samples().div_ceil(self.batch_size)
    }

    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dataset(&self) -> &SegmentationDataset {
        &self.dataset
    }

    /// Start the next pass.
    pub fn iter(&self) -> BatchIter<B> {
        let pass = self.pass.fetch_add(1, Ordering::Relaxed);
        self.iter_pass(pass)
    }

    /// Start pass `pass` explicitly. The same pass always yields the same
    /// batches.
    pub fn iter_pass(&self, pass: u64) -> BatchIter<B> {
        let mut order: Vec<usize> = (0..self.num_samples()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(pass));
            order.shuffle(&mut rng);
        }
        let batches: Arc<Vec<Vec<usize>>> =
            Arc::new(order.chunks(self.batch_size).map(<[usize]>::to_vec).collect());

        let workers = self.num_workers.min(batches.len());
        let (receivers, handles): (Vec<_>, Vec<_>) = (0..workers)
            .map(|worker| spawn_worker(worker, workers, pass, &self.dataset, &batches, self.prefetch))
            .unzip();

        BatchIter {
            dataset: Arc::clone(&self.dataset),
            batcher: self.batcher.clone(),
            device: self.device.clone(),
            batches,
            pass,
            next: 0,
            receivers,
            handles,
        }
    }
}

type WorkerResult = DatasetResult<Vec<SegItem>>;

fn load_batch(dataset: &SegmentationDataset, indices: &[usize], pass: u64) -> WorkerResult {
    indices
        .iter()
        .filter_map(|&i| dataset.try_get(i, pass))
        .collect()
}

fn spawn_worker(
    worker: usize,
    workers: usize,
    pass: u64,
    dataset: &Arc<SegmentationDataset>,
    batches: &Arc<Vec<Vec<usize>>>,
    prefetch: usize,
) -> (Receiver<WorkerResult>, JoinHandle<()>) {
    let (tx, rx) = bounded(prefetch);
    let dataset = Arc::clone(dataset);
    let batches = Arc::clone(batches);

    let handle = thread::spawn(move || {
        for indices in batches.iter().skip(worker).step_by(workers) {
            let result = load_batch(&dataset, indices, pass);
            let failed = result.is_err();
            if tx.send(result).is_err() || failed {
                break;
            }
        }
    });
    (rx, handle)
}

/// One pass over a [`BatchLoader`].
///
/// Dropping the iterator disconnects the workers, which exit after their
/// current batch.
pub struct BatchIter<B: Backend> {
    dataset: Arc<SegmentationDataset>,
    batcher: SegBatcher<B>,
    device: B::Device,
    batches: Arc<Vec<Vec<usize>>>,
    pass: u64,
    next: usize,
    receivers: Vec<Receiver<WorkerResult>>,
    handles: Vec<JoinHandle<()>>,
}

impl<B: Backend> BatchIter<B> {
    pub fn remaining(&self) -> usize {
        self.batches.len() - self.next
    }

    fn fetch(&self, batch: usize) -> WorkerResult {
        if self.receivers.is_empty() {
            return load_batch(&self.dataset, &self.batches[batch], self.pass);
        }
        let worker = batch % self.receivers.len();
        self.receivers[worker]
            .recv()
            .map_err(|_| DatasetError::WorkerDisconnected { worker, batch })?
    }
}

impl<B: Backend> Iterator for BatchIter<B> {
    type Item = DatasetResult<SegBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.batches.len() {
            return None;
        }
        let batch = self.next;
        self.next += 1;

        match self.fetch(batch) {
            Ok(items) => Some(Ok(self.batcher.batch(items, &self.device))),
            Err(e) => {
                // A failed pass does not resume.
                self.next = self.batches.len();
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl<B: Backend> Drop for BatchIter<B> {
    fn drop(&mut self) {
        self.receivers.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("prefetch worker panicked");
            }
        }
    }
}
