//! Per-epoch learning-rate schedules.

use burn::{config::Config, LearningRate};

/// A learning rate that changes between epochs.
pub trait LrSchedule {
    /// Learning rate for the current epoch.
    fn lr(&self) -> LearningRate;

    /// Advance to the next epoch.
    fn step(&mut self);
}

/// Configuration for [`StepLr`].
#[derive(Config, Debug)]
pub struct StepLrConfig {
    #[config(default = 0.005)]
    pub initial: f64,
    /// Epochs between two decays.
    #[config(default = 3)]
    pub step_size: usize,
    #[config(default = 0.1)]
    pub gamma: f64,
}

impl StepLrConfig {
    pub const fn init(&self) -> StepLr {
        StepLr {
            initial: self.initial,
            step_size: self.step_size,
            gamma: self.gamma,
            epoch: 0,
        }
    }
}

/// Multiplies the rate by `gamma` every `step_size` epochs.
#[derive(Debug, Clone)]
pub struct StepLr {
    initial: f64,
    step_size: usize,
    gamma: f64,
    epoch: usize,
}

impl StepLr {
    /// Completed epochs.
    pub const fn epoch(&self) -> usize {
        self.epoch
    }
}

impl LrSchedule for StepLr {
    fn lr(&self) -> LearningRate {
        // A zero step size never decays.
        let decays = self.epoch.checked_div(self.step_size).unwrap_or(0);
        self.initial * self.gamma.powi(decays as i32)
    }

    fn step(&mut self) {
        self.epoch += 1;
    }
}

/// A fixed learning rate.
#[derive(Debug, Clone, Copy)]
pub struct ConstantLr(pub LearningRate);

impl LrSchedule for ConstantLr {
    fn lr(&self) -> LearningRate {
        self.0
    }

    fn step(&mut self) {}
}
