//! The epoch loop and the run orchestrator.

use std::path::PathBuf;

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use chrono::Utc;
use tileseg_data::{load, BatchLoader, SampleIndex};
use tileseg_model::{Criterion, EncNet, SegmentationModel};

use crate::{
    checkpoint::{experiment_name, Decision, FileCheckpointer, ModelSaver},
    config::TrainingConfig,
    error::{TrainingError, TrainingResult},
    schedule::LrSchedule,
};

/// Running mean over non-overlapping windows of batch losses.
#[derive(Debug, Clone)]
pub struct LossWindow {
    interval: usize,
    sum: f64,
    count: usize,
}

impl LossWindow {
    /// A window of `interval` batches. Zero is treated as one.
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            sum: 0.0,
            count: 0,
        }
    }

    /// Add one loss. Returns the window mean when the window is full, then
    /// starts a new window.
    pub fn push(&mut self, loss: f64) -> Option<f64> {
        self.sum += loss;
        self.count += 1;
        if self.count < self.interval {
            return None;
        }
        let mean = self.sum / self.count as f64;
        self.sum = 0.0;
        self.count = 0;
        Some(mean)
    }
}

/// Loop bounds and reporting cadence.
#[derive(Debug, Clone, Copy)]
pub struct TrainSettings {
    pub num_epochs: usize,
    pub report_interval: usize,
}

/// Train `model` for up to `settings.num_epochs` passes over `loader`.
///
/// After every epoch the scheduler steps and `on_epoch` is called with the
/// one-based epoch number and the current model. Returning
/// [`Decision::Stop`] ends training early.
///
/// # Errors
///
/// Fails on the first batch that cannot be loaded, on a batch without
/// masks, on a non-finite loss and on any error returned by `on_epoch`.
#[allow(clippy::too_many_arguments)]
pub fn train_epochs<B, M, C, O, S, F>(
    mut model: M,
    loader: &BatchLoader<B>,
    criterion: &C,
    optimizer: &mut O,
    scheduler: &mut S,
    settings: TrainSettings,
    device: &B::Device,
    mut on_epoch: F,
) -> TrainingResult<M>
where
    B: AutodiffBackend,
    M: SegmentationModel<B> + AutodiffModule<B>,
    C: Criterion<B>,
    O: Optimizer<M, B>,
    S: LrSchedule,
    F: FnMut(usize, &M) -> TrainingResult<Decision>,
{
    for epoch in 1..=settings.num_epochs {
        let lr = scheduler.lr();
        let mut window = LossWindow::new(settings.report_interval);
        let mut epoch_loss = 0.0;
        let mut batches = 0usize;

        tracing::info!(epoch, lr, batches = loader.num_batches(), "epoch started");

        for (index, batch) in loader.iter().enumerate() {
            let number = index + 1;
            let batch = batch?.to_device(device);
            let targets = batch.targets().ok_or(TrainingError::MissingTargets {
                epoch,
                batch: number,
            })?;

            let output = model.forward(batch.images);
            let loss = criterion.compute(&output, targets);
            let value: f64 = loss.clone().into_scalar().elem();
            if !value.is_finite() {
                return Err(TrainingError::TrainingDiverged {
                    epoch,
                    batch: number,
                    loss: value,
                });
            }

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);

            epoch_loss += value;
            batches += 1;
            if let Some(mean) = window.push(value) {
                tracing::info!(epoch, batch = number, loss = mean, "training loss");
            }
        }

        scheduler.step();
        tracing::info!(
            epoch,
            mean_loss = epoch_loss / batches.max(1) as f64,
            "epoch finished"
        );

        if on_epoch(epoch, &model)? == Decision::Stop {
            tracing::info!(epoch, "early stopping");
            break;
        }
    }

    Ok(model)
}

/// Sum of the criterion over every batch of `loader`, without gradients.
///
/// # Errors
///
/// Fails when a batch cannot be loaded or carries no masks.
pub fn validation_loss<B, M, C>(
    model: &M,
    loader: &BatchLoader<B>,
    criterion: &C,
    device: &B::Device,
) -> TrainingResult<f64>
where
    B: AutodiffBackend,
    M: SegmentationModel<B::InnerBackend>,
    C: Criterion<B::InnerBackend>,
{
    let mut total = 0.0;
    for (index, batch) in loader.iter().enumerate() {
        let batch = batch?.to_device(device).inner();
        let targets = batch
            .targets()
            .ok_or(TrainingError::ValidationTargetsMissing { batch: index + 1 })?;
        let output = model.forward(batch.images);
        let loss: f64 = criterion.compute(&output, targets).into_scalar().elem();
        total += loss;
    }
    Ok(total)
}

/// What a finished run left behind.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub experiment: String,
    /// The final model record.
    pub model_path: PathBuf,
    /// Epochs actually trained.
    pub epochs: usize,
    /// Set when the run stopped before `num_epochs`.
    pub stopped_early: bool,
}

/// Run a complete training job on `device`.
///
/// Builds the sample index and loaders, initializes the network and
/// optimizer, trains, and writes the configuration snapshot plus the final
/// model to `<artifact_dir>/<experiment>/`.
///
/// # Errors
///
/// Returns the first dataset, model, training or checkpoint error.
pub fn run<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> TrainingResult<RunSummary> {
    config.validate()?;
    B::seed(config.seed);

    let experiment = experiment_name(config.name.as_deref(), Utc::now());
    let saver = FileCheckpointer::new(&config.artifact_dir);
    let dir = saver.ensure_dir(&experiment)?;
    config.write_json_file(dir.join("config.json"))?;
    tracing::info!(experiment = %experiment, dir = %dir.display(), "experiment created");

    let index = SampleIndex::build(&config.data.index_config())?;
    let loaders = load::<B>(
        index,
        &config.data.loader_config(config.seed, config.split_mode()),
        &device,
    )?;

    let model = config.model.init::<B>(&device)?;
    tracing::info!(
        backbone = %config.model.backbone,
        num_classes = config.model.num_classes,
        params = model.num_params(),
        "model initialized"
    );

    let criterion = config.loss.init();
    let mut optimizer = config.optimizer.adam().init::<B, EncNet<B>>();
    let mut scheduler = config.optimizer.schedule.init();
    let mut stopper = config
        .early_stopping
        .enabled
        .then(|| config.early_stopping.init());

    let settings = TrainSettings {
        num_epochs: config.num_epochs,
        report_interval: config.report_interval,
    };

    let mut epochs = 0;
    let model = train_epochs(
        model,
        &loaders.train,
        &criterion,
        &mut optimizer,
        &mut scheduler,
        settings,
        &device,
        |epoch, model| {
            epochs = epoch;
            let (Some(stopper), Some(val)) = (stopper.as_mut(), loaders.val.as_ref()) else {
                return Ok(Decision::Continue);
            };
            let loss = validation_loss::<B, _, _>(&model.valid(), val, &criterion, &device)?;
            tracing::info!(epoch, val_loss = loss, "validation finished");
            stopper.observe::<B, _, _>(loss, model, &experiment, &saver)
        },
    )?;

    let model_path = ModelSaver::<B>::save(&saver, &model, &experiment)?;
    tracing::info!(path = %model_path.display(), "final model saved");

    Ok(RunSummary {
        experiment,
        model_path,
        epochs,
        stopped_early: stopper.is_some_and(|s| s.state().stopped),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_window_reports_each_full_window() {
        let mut window = LossWindow::new(2);
        let reports: Vec<Option<f64>> = [1.0, 3.0, 5.0, 7.0, 9.0]
            .into_iter()
            .map(|loss| window.push(loss))
            .collect();

        assert_eq!(reports, vec![None, Some(2.0), None, Some(6.0), None]);
    }

    #[test]
    fn loss_window_of_one_reports_every_loss() {
        let mut window = LossWindow::new(0);
        assert_eq!(window.push(0.5), Some(0.5));
        assert_eq!(window.push(1.5), Some(1.5));
    }
}
