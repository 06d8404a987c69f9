//! # The Training Loop
//!
//! A custom optimization loop over an externally supplied batch stream:
//! Adam with scheduled rates, periodic checkpoints via
//! [`CompactRecorder`], and periodic PNG snapshots of the predicted and
//! ground-truth flow rendered through [`crate::flowio::color`].

use crate::flowio::color::flow_to_image;
use crate::flowio::image::{flow_tensor_to_field, tensor_to_rgb_image};
use crate::models::flownet::estimator::{FlowEstimator, FlowInput};
use crate::runner::schedule::TrainingSchedule;
use anyhow::Context;
use bimm_contracts::assert_shape_contract;
use burn::config::Config;
use burn::lr_scheduler::LrScheduler;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::Tensor;
use burn::record::CompactRecorder;
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use std::path::Path;

/// One training example: an image pair and its ground-truth flow.
#[derive(Debug, Clone)]
pub struct FlowBatch<B: AutodiffBackend> {
    /// The image pair.
    pub input: FlowInput<B>,

    /// Ground-truth flow, ``[batch, 2, height, width]`` in pixel units.
    pub target: Tensor<B, 4>,
}

impl<B: AutodiffBackend> FlowBatch<B> {
    /// Bundle an input pair with its ground truth.
    ///
    /// # Panics
    ///
    /// If the target does not match the input batch and resolution.
    pub fn new(
        input: FlowInput<B>,
        target: Tensor<B, 4>,
    ) -> Self {
        let [height, width] = input.resolution();
        assert_shape_contract!(
            ["batch", "uv", "height", "width"],
            &target,
            &[
                ("batch", input.batch_size()),
                ("uv", 2),
                ("height", height),
                ("width", width)
            ],
        );
        Self { input, target }
    }
}

/// [`train`] Config.
#[derive(Config, Debug)]
pub struct TrainerConfig {
    /// Directory for checkpoints and snapshots.
    pub artifact_dir: String,

    /// Log loss and rate every this many steps.
    #[config(default = 100)]
    pub log_every: usize,

    /// Save a model checkpoint every this many steps.
    #[config(default = 5000)]
    pub checkpoint_every: usize,

    /// Render flow snapshots every this many steps.
    #[config(default = 2500)]
    pub snapshot_every: usize,

    /// Run a single verbose step and stop.
    #[config(default = false)]
    pub debug: bool,
}

/// Train a flow estimator over a batch stream.
///
/// The stream supplies batches in order; training consumes
/// `schedule.max_iter` of them (or stops early if the stream ends) and
/// returns the final model, writing a checkpoint of it on completion.
/// A debug run returns after its single step without checkpointing.
/// A failed batch load aborts the run with its error.
pub fn train<B, M>(
    mut model: M,
    batches: impl Iterator<Item = anyhow::Result<FlowBatch<B>>>,
    schedule: &TrainingSchedule,
    config: &TrainerConfig,
) -> anyhow::Result<M>
where
    B: AutodiffBackend,
    M: FlowEstimator<B> + AutodiffModule<B>,
{
    schedule.validate()?;
    std::fs::create_dir_all(&config.artifact_dir)
        .with_context(|| format!("failed to create {}", config.artifact_dir))?;

    let mut optim = AdamConfig::new()
        .with_beta_1(schedule.momentum as f32)
        .with_beta_2(schedule.momentum2 as f32)
        .init();
    let mut lr_schedule = schedule.scheduler();
    let recorder = CompactRecorder::new();

    let mut step: usize = 0;
    for batch in batches.take(schedule.max_iter) {
        let batch = batch?;
        let lr = lr_schedule.step();

        let snapshot_due =
            config.debug || (step > 0 && step.is_multiple_of(config.snapshot_every));
        let snapshot_input = snapshot_due.then(|| batch.input.clone());

        let predictions = model.forward(batch.input);
        let loss = model.loss(batch.target.clone(), &predictions);
        let loss_value: f32 = loss.clone().into_scalar().elem();

        if config.debug {
            let [height, width] = [predictions.flow.dims()[2], predictions.flow.dims()[3]];
            println!("debug step: lr={lr} loss={loss_value}");
            println!("  flow: [{height}, {width}]");
            for (level, prediction) in predictions.pyramid.iter().enumerate() {
                println!("  pyramid[{level}]: {:?}", prediction.dims());
            }
        } else if step.is_multiple_of(config.log_every) {
            println!("step {step}: lr={lr} loss={loss_value}");
        }

        if snapshot_due {
            write_snapshot(
                &config.artifact_dir,
                step,
                snapshot_input.as_ref(),
                predictions.flow.clone(),
                batch.target.clone(),
            )?;
        }

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(lr, model, grads);
        step += 1;

        if config.debug {
            return Ok(model);
        }

        if step.is_multiple_of(config.checkpoint_every) {
            save_checkpoint(&model, &config.artifact_dir, step, &recorder)?;
        }
    }

    save_checkpoint(&model, &config.artifact_dir, step, &recorder)?;
    Ok(model)
}

fn save_checkpoint<B, M>(
    model: &M,
    artifact_dir: &str,
    step: usize,
    recorder: &CompactRecorder,
) -> anyhow::Result<()>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let path = Path::new(artifact_dir).join(format!("model-{step}"));
    model
        .clone()
        .save_file(&path, recorder)
        .with_context(|| format!("failed to write checkpoint {}", path.display()))?;
    Ok(())
}

fn write_snapshot<B: AutodiffBackend>(
    artifact_dir: &str,
    step: usize,
    input: Option<&FlowInput<B>>,
    predicted: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> anyhow::Result<()> {
    let dir = Path::new(artifact_dir);

    let (predicted_image, _) = flow_to_image(&flow_tensor_to_field(predicted));
    predicted_image
        .save(dir.join(format!("snapshot-{step}-predicted.png")))
        .context("failed to write predicted flow snapshot")?;

    let (target_image, _) = flow_to_image(&flow_tensor_to_field(target));
    target_image
        .save(dir.join(format!("snapshot-{step}-truth.png")))
        .context("failed to write ground-truth snapshot")?;

    if let Some(input) = input {
        tensor_to_rgb_image(input.image_a.clone().narrow(0, 0, 1))
            .save(dir.join(format!("snapshot-{step}-input.png")))
            .context("failed to write input snapshot")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::flownet::flownet_s::{FlowNetS, FlowNetSConfig};
    use crate::runner::schedule::TrainingSchedule;
    use burn::backend::{Autodiff, NdArray};

    type AB = Autodiff<NdArray<f32>>;

    fn constant_batch() -> FlowBatch<AB> {
        let device = Default::default();
        FlowBatch::new(
            FlowInput::new(
                Tensor::full([1, 3, 64, 64], 0.5, &device),
                Tensor::full([1, 3, 64, 64], 0.4, &device),
            ),
            Tensor::full([1, 2, 64, 64], 1.0, &device),
        )
    }

    fn constant_batches(count: usize) -> impl Iterator<Item = anyhow::Result<FlowBatch<AB>>> {
        (0..count).map(move |_| Ok(constant_batch()))
    }

    #[test]
    #[should_panic]
    fn test_flow_batch_rejects_mismatched_target() {
        let device = Default::default();
        FlowBatch::<AB>::new(
            FlowInput::new(
                Tensor::zeros([1, 3, 64, 64], &device),
                Tensor::zeros([1, 3, 64, 64], &device),
            ),
            Tensor::zeros([1, 2, 64, 128], &device),
        );
    }

    #[test]
    fn test_train_reduces_loss() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();

        let model: FlowNetS<AB> = FlowNetSConfig::new().init(&device);
        let schedule = TrainingSchedule::new(vec![], vec![0.0001], 4);
        let config = TrainerConfig::new(tmp.path().to_string_lossy().to_string())
            .with_checkpoint_every(2)
            .with_snapshot_every(2);

        let probe_loss = |model: &FlowNetS<AB>| -> f32 {
            let batch = constant_batch();
            let predictions = model.forward(batch.input);
            model
                .loss(batch.target, &predictions)
                .into_scalar()
                .elem()
        };

        let before = probe_loss(&model);
        let model = train(model, constant_batches(4), &schedule, &config).unwrap();
        let after = probe_loss(&model);

        assert!(after.is_finite());
        assert!(after < before, "loss did not decrease: {before} -> {after}");

        // Final checkpoint was written.
        assert!(tmp.path().join("model-4.mpk").exists());
        // Snapshot at step 2 was written.
        assert!(tmp.path().join("snapshot-2-predicted.png").exists());
    }

    #[test]
    fn test_debug_mode_runs_one_step() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();

        let model: FlowNetS<AB> = FlowNetSConfig::new().init(&device);
        let schedule = TrainingSchedule::new(vec![], vec![0.0001], 1000);
        let config = TrainerConfig::new(tmp.path().to_string_lossy().to_string())
            .with_debug(true);

        // A debug run must stop after one step, long before 1000.
        train(model, constant_batches(1000), &schedule, &config).unwrap();

        // No checkpoint on the debug path.
        assert!(!tmp.path().join("model-1.mpk").exists());
    }

    #[test]
    fn test_failed_batch_load_aborts_training() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();

        let model: FlowNetS<AB> = FlowNetSConfig::new().init(&device);
        let schedule = TrainingSchedule::new(vec![], vec![0.0001], 10);
        let config = TrainerConfig::new(tmp.path().to_string_lossy().to_string());

        let batches = (0..10).map(|i| {
            if i < 2 {
                Ok(constant_batch())
            } else {
                Err(anyhow::anyhow!("sample {i} is corrupt"))
            }
        });

        let err = train(model, batches, &schedule, &config).unwrap_err();
        assert!(err.to_string().contains("sample 2 is corrupt"));
    }
}
