//! # Composite Networks
//!
//! Sequential chains of flow estimators. An upstream stage runs with its
//! parameters frozen; its flow warps image B toward image A; the next
//! stage receives the pair plus the warped image, a brightness-error
//! map, and the upstream flow scaled into a trainable range. The final
//! stage's `forward`/`loss` are the composite's `forward`/`loss`.
//!
//! Freezing earlier stages is deliberate: the refinement stages train
//! against a fixed coarse estimator instead of degrading it.

use crate::models::flownet::estimator::{FlowEstimator, FlowInput, FlowPredictions};
use crate::models::flownet::flownet_c::{FlowNetC, FlowNetCConfig};
use crate::models::flownet::flownet_s::{FlowNetS, FlowNetSConfig, STAGE_INPUT_CHANNELS};
use crate::ops::warp::flow_warp;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::record::{FileRecorder, RecorderError};
use std::path::PathBuf;

/// The assembled input of a refinement stage.
#[derive(Debug, Clone)]
pub struct StageInput<B: Backend> {
    /// First image.
    pub image_a: Tensor<B, 4>,
    /// Second image.
    pub image_b: Tensor<B, 4>,
    /// Image B warped toward image A by the upstream flow.
    pub warped: Tensor<B, 4>,
    /// Upstream flow scaled into the decoder's trainable range.
    pub flow: Tensor<B, 4>,
    /// Per-pixel L2 norm over channels of `image_a - warped`.
    pub brightness_error: Tensor<B, 4>,
}

impl<B: Backend> StageInput<B> {
    /// Assemble the refinement input from an upstream flow estimate.
    ///
    /// # Arguments
    ///
    /// - `input`: the original image pair.
    /// - `upstream_flow`: full-resolution flow in pixel units.
    /// - `flow_scale`: scale into the decoder's internal units
    ///   (0.05 matches the pretrained stacks).
    pub fn assemble(
        input: &FlowInput<B>,
        upstream_flow: Tensor<B, 4>,
        flow_scale: f64,
    ) -> Self {
        let warped = flow_warp(input.image_b.clone(), upstream_flow.clone());

        let difference = input.image_a.clone() - warped.clone();
        let brightness_error = difference.powi_scalar(2).sum_dim(1).sqrt();

        Self {
            image_a: input.image_a.clone(),
            image_b: input.image_b.clone(),
            warped,
            flow: upstream_flow * flow_scale,
            brightness_error,
        }
    }

    /// Concatenate into the [`STAGE_INPUT_CHANNELS`]-channel tensor the
    /// stacked network consumes.
    pub fn into_channels(self) -> Tensor<B, 4> {
        Tensor::cat(
            vec![
                self.image_a,
                self.image_b,
                self.warped,
                self.flow,
                self.brightness_error,
            ],
            1,
        )
    }
}

/// [`FlowNetCS`] Config.
#[derive(Config, Debug)]
pub struct FlowNetCSConfig {
    /// Scale applied to the upstream flow between stages.
    #[config(default = 0.05)]
    pub flow_scale: f64,

    /// Freeze the upstream stage's parameters.
    #[config(default = true)]
    pub freeze_upstream: bool,

    /// Upstream correlation network.
    #[config(default = "FlowNetCConfig::new()")]
    pub net_c: FlowNetCConfig,
}

impl FlowNetCSConfig {
    /// Initialize a [`FlowNetCS`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FlowNetCS<B> {
        let net_c = self.net_c.init(device);
        FlowNetCS {
            net_c: if self.freeze_upstream {
                net_c.no_grad()
            } else {
                net_c
            },
            net_s: FlowNetSConfig::new()
                .with_input_channels(STAGE_INPUT_CHANNELS)
                .init(device),
            flow_scale: self.flow_scale,
            frozen_upstream: self.freeze_upstream,
        }
    }
}

/// FlowNetC refined by a stacked stage.
#[derive(Module, Debug)]
pub struct FlowNetCS<B: Backend> {
    /// The frozen coarse estimator.
    pub net_c: FlowNetC<B>,
    /// The trainable refinement stage.
    pub net_s: FlowNetS<B>,

    flow_scale: f64,
    frozen_upstream: bool,
}

impl<B: Backend> FlowNetCS<B> {
    /// Restore the upstream stage from a FlowNetC checkpoint.
    pub fn load_net_c_file<FR: FileRecorder<B>>(
        mut self,
        path: impl Into<PathBuf>,
        recorder: &FR,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        let net_c = self.net_c.load_file(path, recorder, device)?;
        self.net_c = if self.frozen_upstream {
            net_c.no_grad()
        } else {
            net_c
        };
        Ok(self)
    }

    /// Restore the refinement stage from a FlowNetS checkpoint.
    pub fn load_net_s_file<FR: FileRecorder<B>>(
        mut self,
        path: impl Into<PathBuf>,
        recorder: &FR,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        self.net_s = self.net_s.load_file(path, recorder, device)?;
        Ok(self)
    }
}

impl<B: Backend> FlowEstimator<B> for FlowNetCS<B> {
    fn forward(
        &self,
        input: FlowInput<B>,
    ) -> FlowPredictions<B> {
        let coarse = self.net_c.forward(input.clone());
        let stage = StageInput::assemble(&input, coarse.flow, self.flow_scale);
        self.net_s.forward_stage(stage)
    }

    fn loss(
        &self,
        target: Tensor<B, 4>,
        predictions: &FlowPredictions<B>,
    ) -> Tensor<B, 1> {
        self.net_s.loss(target, predictions)
    }
}

/// [`FlowNetCSS`] Config.
#[derive(Config, Debug)]
pub struct FlowNetCSSConfig {
    /// Scale applied to the upstream flow between stages.
    #[config(default = 0.05)]
    pub flow_scale: f64,

    /// Freeze the upstream stages' parameters.
    #[config(default = true)]
    pub freeze_upstream: bool,

    /// Upstream two-stage chain.
    #[config(default = "FlowNetCSConfig::new()")]
    pub net_cs: FlowNetCSConfig,
}

impl FlowNetCSSConfig {
    /// Initialize a [`FlowNetCSS`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FlowNetCSS<B> {
        let net_cs = self.net_cs.init(device);
        FlowNetCSS {
            net_cs: if self.freeze_upstream {
                net_cs.no_grad()
            } else {
                net_cs
            },
            net_s: FlowNetSConfig::new()
                .with_input_channels(STAGE_INPUT_CHANNELS)
                .init(device),
            flow_scale: self.flow_scale,
            frozen_upstream: self.freeze_upstream,
        }
    }
}

/// FlowNetCS refined by a second stacked stage.
#[derive(Module, Debug)]
pub struct FlowNetCSS<B: Backend> {
    /// The frozen two-stage chain.
    pub net_cs: FlowNetCS<B>,
    /// The trainable refinement stage.
    pub net_s: FlowNetS<B>,

    flow_scale: f64,
    frozen_upstream: bool,
}

impl<B: Backend> FlowNetCSS<B> {
    /// Restore the upstream chain from a FlowNetCS checkpoint.
    pub fn load_net_cs_file<FR: FileRecorder<B>>(
        mut self,
        path: impl Into<PathBuf>,
        recorder: &FR,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        let net_cs = self.net_cs.load_file(path, recorder, device)?;
        self.net_cs = if self.frozen_upstream {
            net_cs.no_grad()
        } else {
            net_cs
        };
        Ok(self)
    }

    /// Restore the refinement stage from a FlowNetS checkpoint.
    pub fn load_net_s_file<FR: FileRecorder<B>>(
        mut self,
        path: impl Into<PathBuf>,
        recorder: &FR,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        self.net_s = self.net_s.load_file(path, recorder, device)?;
        Ok(self)
    }
}

impl<B: Backend> FlowEstimator<B> for FlowNetCSS<B> {
    fn forward(
        &self,
        input: FlowInput<B>,
    ) -> FlowPredictions<B> {
        let coarse = self.net_cs.forward(input.clone());
        let stage = StageInput::assemble(&input, coarse.flow, self.flow_scale);
        self.net_s.forward_stage(stage)
    }

    fn loss(
        &self,
        target: Tensor<B, 4>,
        predictions: &FlowPredictions<B>,
    ) -> Tensor<B, 1> {
        self.net_s.loss(target, predictions)
    }
}

/// [`FlowNet2`] Config.
#[derive(Config, Debug)]
pub struct FlowNet2Config {
    /// Scale applied to the upstream flow between stages.
    #[config(default = 0.05)]
    pub flow_scale: f64,

    /// Freeze the upstream stages' parameters.
    #[config(default = true)]
    pub freeze_upstream: bool,

    /// Upstream three-stage chain.
    #[config(default = "FlowNetCSSConfig::new()")]
    pub net_css: FlowNetCSSConfig,
}

impl FlowNet2Config {
    /// Initialize a [`FlowNet2`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FlowNet2<B> {
        let net_css = self.net_css.init(device);
        FlowNet2 {
            net_css: if self.freeze_upstream {
                net_css.no_grad()
            } else {
                net_css
            },
            net_s: FlowNetSConfig::new()
                .with_input_channels(STAGE_INPUT_CHANNELS)
                .init(device),
            flow_scale: self.flow_scale,
            frozen_upstream: self.freeze_upstream,
        }
    }
}

/// The full chain: FlowNetCSS refined by a final stacked stage.
#[derive(Module, Debug)]
pub struct FlowNet2<B: Backend> {
    /// The frozen three-stage chain.
    pub net_css: FlowNetCSS<B>,
    /// The trainable final stage.
    pub net_s: FlowNetS<B>,

    flow_scale: f64,
    frozen_upstream: bool,
}

impl<B: Backend> FlowNet2<B> {
    /// Restore the upstream chain from a FlowNetCSS checkpoint.
    pub fn load_net_css_file<FR: FileRecorder<B>>(
        mut self,
        path: impl Into<PathBuf>,
        recorder: &FR,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        let net_css = self.net_css.load_file(path, recorder, device)?;
        self.net_css = if self.frozen_upstream {
            net_css.no_grad()
        } else {
            net_css
        };
        Ok(self)
    }

    /// Restore the final stage from a FlowNetS checkpoint.
    pub fn load_net_s_file<FR: FileRecorder<B>>(
        mut self,
        path: impl Into<PathBuf>,
        recorder: &FR,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        self.net_s = self.net_s.load_file(path, recorder, device)?;
        Ok(self)
    }
}

impl<B: Backend> FlowEstimator<B> for FlowNet2<B> {
    fn forward(
        &self,
        input: FlowInput<B>,
    ) -> FlowPredictions<B> {
        let coarse = self.net_css.forward(input.clone());
        let stage = StageInput::assemble(&input, coarse.flow, self.flow_scale);
        self.net_s.forward_stage(stage)
    }

    fn loss(
        &self,
        target: Tensor<B, 4>,
        predictions: &FlowPredictions<B>,
    ) -> Tensor<B, 1> {
        self.net_s.loss(target, predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};

    type B = NdArray<f32>;

    #[test]
    fn test_stage_input_assembly_zero_flow() {
        let device = Default::default();
        let input = FlowInput::<B>::new(
            Tensor::full([1, 3, 64, 64], 0.75, &device),
            Tensor::full([1, 3, 64, 64], 0.25, &device),
        );

        let flow = Tensor::zeros([1, 2, 64, 64], &device);
        let stage = StageInput::assemble(&input, flow, 0.05);

        // Zero flow: the warp is the identity.
        let warped = stage.warped.clone().to_data().to_vec::<f32>().unwrap();
        assert!(warped.iter().all(|v| (v - 0.25).abs() < 1e-6));

        // Brightness error = sqrt(3 * 0.5^2) everywhere.
        let expected = (3.0f32 * 0.25).sqrt();
        let be = stage
            .brightness_error
            .clone()
            .to_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(be.iter().all(|v| (v - expected).abs() < 1e-5));

        let stacked = stage.into_channels();
        assert_eq!(stacked.dims(), [1, STAGE_INPUT_CHANNELS, 64, 64]);
    }

    #[test]
    fn test_stage_input_flow_scaling() {
        let device = Default::default();
        let input = FlowInput::<B>::new(
            Tensor::zeros([1, 3, 64, 64], &device),
            Tensor::zeros([1, 3, 64, 64], &device),
        );

        let flow = Tensor::full([1, 2, 64, 64], 20.0, &device);
        let stage = StageInput::assemble(&input, flow, 0.05);

        let scaled = stage.flow.to_data().to_vec::<f32>().unwrap();
        assert!(scaled.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_flownet_cs_resolution_compatibility() {
        let device = Default::default();
        let net: FlowNetCS<B> = FlowNetCSConfig::new().init(&device);

        let input = FlowInput::new(
            Tensor::zeros([1, 3, 64, 128], &device),
            Tensor::zeros([1, 3, 64, 128], &device),
        );
        let predictions = net.forward(input);
        assert_eq!(predictions.flow.dims(), [1, 2, 64, 128]);
    }

    #[test]
    fn test_frozen_stage_unchanged_by_optimizer_step() {
        type AB = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: FlowNetCS<AB> = FlowNetCSConfig::new().init(&device);

        let probe = FlowInput::new(
            Tensor::full([1, 3, 64, 64], 0.5, &device),
            Tensor::full([1, 3, 64, 64], 0.4, &device),
        );
        let before_c = model
            .net_c
            .forward(probe.clone())
            .flow
            .to_data()
            .to_vec::<f32>()
            .unwrap();
        let before_s = model
            .forward(probe.clone())
            .flow
            .to_data()
            .to_vec::<f32>()
            .unwrap();

        // One Adam step with an aggressive rate so any update is visible.
        let mut optim = AdamConfig::new().init();
        let input = FlowInput::new(
            Tensor::full([1, 3, 64, 64], 0.5, &device),
            Tensor::full([1, 3, 64, 64], 0.4, &device),
        );
        let target = Tensor::full([1, 2, 64, 64], 2.0, &device);

        let predictions = model.forward(input);
        let loss = model.loss(target, &predictions);
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let model = optim.step(0.1, model, grads);

        let after_c = model
            .net_c
            .forward(probe.clone())
            .flow
            .to_data()
            .to_vec::<f32>()
            .unwrap();
        let after_s = model
            .forward(probe)
            .flow
            .to_data()
            .to_vec::<f32>()
            .unwrap();

        // Frozen stage bit-identical; trainable stage moved.
        assert_eq!(before_c, after_c);
        assert!(
            before_s
                .iter()
                .zip(&after_s)
                .any(|(b, a)| (b - a).abs() > 1e-9)
        );
    }
}
