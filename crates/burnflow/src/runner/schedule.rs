//! # Learning Rate Schedules
//!
//! Piecewise-constant schedules over global step counts, plus the two
//! canonical presets: [`TrainingSchedule::long_schedule`] for training
//! from scratch and [`TrainingSchedule::fine_schedule`] for fine-tuning
//! a restored checkpoint.

use anyhow::bail;
use burn::LearningRate;
use burn::config::Config;
use burn::lr_scheduler::LrScheduler;
use burn::prelude::Backend;

/// A piecewise-constant training schedule.
///
/// The learning rate is `learning_rates[0]` through `step_values[0]`
/// inclusive, `learning_rates[i + 1]` once the step exceeds
/// `step_values[i]`, and training stops at `max_iter`.
#[derive(Config, Debug)]
pub struct TrainingSchedule {
    /// Step boundaries, strictly increasing.
    pub step_values: Vec<usize>,

    /// Learning rates, one more than `step_values`.
    pub learning_rates: Vec<f64>,

    /// Adam first-moment decay.
    #[config(default = 0.9)]
    pub momentum: f64,

    /// Adam second-moment decay.
    #[config(default = 0.999)]
    pub momentum2: f64,

    /// Total number of optimization steps.
    pub max_iter: usize,
}

impl TrainingSchedule {
    /// The from-scratch schedule.
    pub fn long_schedule() -> Self {
        Self::new(
            vec![400_000, 600_000, 800_000, 1_000_000],
            vec![0.0001, 0.00005, 0.000025, 0.0000125, 0.00000625],
            1_200_000,
        )
    }

    /// The fine-tuning schedule, picking up after [`Self::long_schedule`].
    pub fn fine_schedule() -> Self {
        Self::new(
            vec![1_250_000, 1_500_000, 1_750_000, 2_000_000],
            vec![0.00001, 0.000005, 0.0000025, 0.00000125, 0.000000625],
            2_500_000,
        )
    }

    /// Check internal consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.learning_rates.len() != self.step_values.len() + 1 {
            bail!(
                "expected {} learning rates for {} step boundaries, found {}",
                self.step_values.len() + 1,
                self.step_values.len(),
                self.learning_rates.len(),
            );
        }
        if !self.step_values.windows(2).all(|w| w[0] < w[1]) {
            bail!("step boundaries must be strictly increasing: {:?}", self.step_values);
        }
        if self.max_iter == 0 {
            bail!("max_iter must be positive");
        }
        Ok(())
    }

    /// The learning rate in effect at a global step.
    pub fn lr_at(
        &self,
        step: usize,
    ) -> f64 {
        // A boundary step itself still runs at the earlier rate.
        let idx = self.step_values.partition_point(|&boundary| boundary < step);
        self.learning_rates[idx]
    }

    /// Build a stateful scheduler starting at step 0.
    pub fn scheduler(&self) -> PiecewiseConstantLr {
        PiecewiseConstantLr {
            step_values: self.step_values.clone(),
            learning_rates: self.learning_rates.clone(),
            step: 0,
        }
    }
}

/// A stateful piecewise-constant scheduler.
///
/// The record is the global step count, so a restored scheduler resumes
/// at the rate its checkpoint was taken at.
#[derive(Clone, Debug)]
pub struct PiecewiseConstantLr {
    step_values: Vec<usize>,
    learning_rates: Vec<f64>,
    step: usize,
}

impl LrScheduler for PiecewiseConstantLr {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        let idx = self.step_values.partition_point(|&boundary| boundary < self.step);
        self.step += 1;
        self.learning_rates[idx]
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.step
    }

    fn load_record<B: Backend>(
        mut self,
        record: Self::Record<B>,
    ) -> Self {
        self.step = record;
        self
    }
}
