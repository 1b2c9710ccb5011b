//! Model persistence and validation-driven early stopping.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use chrono::{DateTime, FixedOffset, Utc};

use crate::error::{TrainingError, TrainingResult};

/// Experiment names are stamped in UTC-5.
const EXPERIMENT_UTC_OFFSET_SECS: i32 = -5 * 3600;

/// Experiment name for a run started at `now`.
///
/// The format is `<dd-mm-YYYY_HH-MM>__<name>`, or the timestamp alone when
/// no name is given.
pub fn experiment_name(name: Option<&str>, now: DateTime<Utc>) -> String {
    let stamp = FixedOffset::east_opt(EXPERIMENT_UTC_OFFSET_SECS)
        .map(|offset| now.with_timezone(&offset).format("%d-%m-%Y_%H-%M").to_string())
        .unwrap_or_else(|| now.format("%d-%m-%Y_%H-%M").to_string());

    match name {
        Some(name) if !name.is_empty() => format!("{stamp}__{name}"),
        _ => stamp,
    }
}

/// Persists a model under a name.
pub trait ModelSaver<B: Backend> {
    /// Save `model` as `name` and return where it went.
    fn save<M: Module<B>>(&self, model: &M, name: &str) -> TrainingResult<PathBuf>;
}

/// Writes each record to `<root>/<name>/<name>_m.mpk`.
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    root: PathBuf,
}

impl FileCheckpointer {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the record saved as `name`.
    pub fn dir_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create the directory for `name` if it is missing.
    pub fn ensure_dir(&self, name: &str) -> TrainingResult<PathBuf> {
        let dir = self.dir_for(name);
        fs::create_dir_all(&dir).map_err(|source| TrainingError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Path of the record stored for `name`.
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir_for(name).join(format!("{name}_m.mpk"))
    }
}

impl<B: Backend> ModelSaver<B> for FileCheckpointer {
    fn save<M: Module<B>>(&self, model: &M, name: &str) -> TrainingResult<PathBuf> {
        let dir = self.ensure_dir(name)?;
        let path = self.record_path(name);
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        // The recorder appends the extension itself.
        model
            .clone()
            .save_file(dir.join(format!("{name}_m")), &recorder)
            .map_err(|e| TrainingError::Checkpoint {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(path = %path.display(), "model saved");
        Ok(path)
    }
}

/// Configuration for [`EarlyStopping`].
#[derive(Config, Debug)]
pub struct EarlyStoppingConfig {
    /// Hold out a validation split and watch its loss.
    #[config(default = false)]
    pub enabled: bool,
    /// Non-improving epochs tolerated before stopping. The run stops on the
    /// first non-improving epoch past this count, so the default of 7 stops
    /// on the eighth.
    #[config(default = 7)]
    pub patience: usize,
    /// Minimum score gain that counts as an improvement.
    #[config(default = 0.0)]
    pub delta: f64,
}

impl EarlyStoppingConfig {
    pub const fn init(&self) -> EarlyStopping {
        EarlyStopping {
            patience: self.patience,
            delta: self.delta,
            state: TrainingState::new(),
        }
    }
}

/// Whether training should go on after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}

/// Progress of the early-stop controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    /// Observations seen so far.
    pub epoch: usize,
    /// Best score, the negated validation loss.
    pub best_score: Option<f64>,
    pub patience_counter: usize,
    pub stopped: bool,
}

impl TrainingState {
    pub const fn new() -> Self {
        Self {
            epoch: 0,
            best_score: None,
            patience_counter: 0,
            stopped: false,
        }
    }
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Checkpoints the best model and stops once the validation loss has not
/// improved for more than `patience` consecutive observations.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    delta: f64,
    state: TrainingState,
}

impl EarlyStopping {
    pub const fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Record one validation loss.
    ///
    /// An improvement saves `model` as `<experiment>_chkpt` through `saver`.
    /// Once stopped, every further call returns [`Decision::Stop`] without
    /// touching the state.
    ///
    /// # Errors
    ///
    /// Returns the saver's error when the checkpoint cannot be written.
    pub fn observe<B, M, S>(
        &mut self,
        val_loss: f64,
        model: &M,
        experiment: &str,
        saver: &S,
    ) -> TrainingResult<Decision>
    where
        B: Backend,
        M: Module<B>,
        S: ModelSaver<B>,
    {
        if self.state.stopped {
            return Ok(Decision::Stop);
        }
        self.state.epoch += 1;
        let score = -val_loss;

        let improved = match self.state.best_score {
            None => true,
            Some(best) => score > best + self.delta,
        };

        if improved {
            tracing::info!(
                previous = ?self.state.best_score.map(|best| -best),
                val_loss,
                "validation loss improved, saving checkpoint"
            );
            saver.save(model, &format!("{experiment}_chkpt"))?;
            self.state.best_score = Some(score);
            self.state.patience_counter = 0;
            return Ok(Decision::Continue);
        }

        self.state.patience_counter += 1;
        tracing::info!(
            counter = self.state.patience_counter,
            patience = self.patience,
            val_loss,
            "validation loss did not improve"
        );
        if self.state.patience_counter > self.patience {
            self.state.stopped = true;
            return Ok(Decision::Stop);
        }
        Ok(Decision::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use burn::nn::{Linear, LinearConfig};
    use chrono::TimeZone;

    use super::*;
    use crate::tests::TestBackend;

    #[derive(Default)]
    struct RecordingSaver {
        names: RefCell<Vec<String>>,
    }

    impl<B: Backend> ModelSaver<B> for RecordingSaver {
        fn save<M: Module<B>>(&self, _model: &M, name: &str) -> TrainingResult<PathBuf> {
            self.names.borrow_mut().push(name.to_string());
            Ok(PathBuf::from(name))
        }
    }

    fn tiny_model() -> Linear<TestBackend> {
        LinearConfig::new(2, 2).init(&Default::default())
    }

    fn run(losses: &[f64], patience: usize, delta: f64) -> (Vec<Decision>, Vec<String>) {
        let mut stopper = EarlyStoppingConfig::new()
            .with_patience(patience)
            .with_delta(delta)
            .init();
        let saver = RecordingSaver::default();
        let model = tiny_model();

        let decisions = losses
            .iter()
            .map(|&loss| {
                stopper
                    .observe::<TestBackend, _, _>(loss, &model, "exp", &saver)
                    .unwrap()
            })
            .collect();
        (decisions, saver.names.into_inner())
    }

    #[test]
    fn stops_on_the_fifth_observation() {
        let (decisions, saved) = run(&[1.0, 0.9, 0.95, 0.95, 0.95], 2, 0.0);

        assert_eq!(
            decisions,
            vec![
                Decision::Continue,
                Decision::Continue,
                Decision::Continue,
                Decision::Continue,
                Decision::Stop,
            ]
        );
        assert_eq!(saved, vec!["exp_chkpt", "exp_chkpt"]);
    }

    #[test]
    fn equal_loss_is_not_an_improvement() {
        let mut stopper = EarlyStoppingConfig::new().with_patience(5).init();
        let saver = RecordingSaver::default();
        let model = tiny_model();

        for _ in 0..3 {
            stopper
                .observe::<TestBackend, _, _>(0.5, &model, "exp", &saver)
                .unwrap();
        }

        let state = stopper.state();
        assert_eq!(state.epoch, 3);
        assert_eq!(state.best_score, Some(-0.5));
        assert_eq!(state.patience_counter, 2);
        assert_eq!(saver.names.borrow().len(), 1);
    }

    #[test]
    fn delta_requires_a_margin() {
        let (decisions, saved) = run(&[1.0, 0.95, 0.8], 0, 0.1);

        // 0.95 is within the margin, so with zero patience the run stops.
        assert_eq!(decisions, vec![Decision::Continue, Decision::Stop, Decision::Stop]);
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn improvement_resets_the_counter() {
        let (decisions, saved) = run(&[1.0, 1.1, 1.2, 0.5, 0.6, 0.7], 2, 0.0);

        assert!(decisions.iter().all(|&d| d == Decision::Continue));
        assert_eq!(saved.len(), 2);
    }

    #[test]
    fn experiment_name_uses_utc_minus_five() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 0).unwrap();

        assert_eq!(experiment_name(Some("baseline"), now), "29-02-2024_21-30__baseline");
        assert_eq!(experiment_name(None, now), "29-02-2024_21-30");
        assert_eq!(experiment_name(Some(""), now), "29-02-2024_21-30");
    }

    #[test]
    fn file_checkpointer_writes_named_records() {
        let root = tempfile::tempdir().unwrap();
        let saver = FileCheckpointer::new(root.path());

        let path = ModelSaver::<TestBackend>::save(&saver, &tiny_model(), "exp").unwrap();

        assert_eq!(path, root.path().join("exp").join("exp_m.mpk"));
        assert!(path.is_file());
    }

    #[test]
    fn best_model_lands_in_its_own_directory() {
        let root = tempfile::tempdir().unwrap();
        let saver = FileCheckpointer::new(root.path());
        let mut stopper = EarlyStoppingConfig::new().init();

        stopper
            .observe::<TestBackend, _, _>(0.4, &tiny_model(), "exp", &saver)
            .unwrap();

        assert!(root
            .path()
            .join("exp_chkpt")
            .join("exp_chkpt_m.mpk")
            .is_file());
        assert!(!root.path().join("exp").exists());
    }

    #[test]
    fn default_patience_stops_on_the_eighth_stale_epoch() {
        let mut losses = vec![1.0];
        losses.extend([1.0; 8]);
        let (decisions, _) = run(&losses, EarlyStoppingConfig::new().patience, 0.0);

        assert!(decisions[..8].iter().all(|&d| d == Decision::Continue));
        assert_eq!(decisions[8], Decision::Stop);
    }
}
