//! # FlowNetS - The Stacked Network
//!
//! A single encoder-decoder tower over a stacked multi-channel input:
//! the bare image pair when standalone (6 channels), or the pair plus a
//! warped image, a scaled coarse flow estimate, and a brightness-error
//! map when refining an upstream stage (12 channels).

use crate::layers::blocks::conv_act::{Conv2dActBlock, Conv2dActBlockConfig};
use crate::models::flownet::compose::StageInput;
use crate::models::flownet::decoder::{FlowDecoder, FlowDecoderConfig, full_resolution_flow};
use crate::models::flownet::estimator::{FlowEstimator, FlowInput, FlowPredictions};
use crate::models::flownet::loss::{MultiScaleEpeLoss, MultiScaleEpeLossConfig};
use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Channels of a refinement-stage input:
/// `image_a(3) + image_b(3) + warped(3) + flow(2) + brightness_error(1)`.
pub const STAGE_INPUT_CHANNELS: usize = 12;

/// [`FlowNetS`] Config.
#[derive(Config, Debug)]
pub struct FlowNetSConfig {
    /// Input channels: 6 standalone, [`STAGE_INPUT_CHANNELS`] when the
    /// network refines an upstream stage.
    #[config(default = 6)]
    pub input_channels: usize,

    /// Loss configuration.
    #[config(default = "MultiScaleEpeLossConfig::new()")]
    pub loss: MultiScaleEpeLossConfig,
}

impl FlowNetSConfig {
    /// Initialize a [`FlowNetS`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FlowNetS<B> {
        FlowNetS {
            conv1: Conv2dActBlockConfig::block([self.input_channels, 64], 7, 2).init(device),
            conv2: Conv2dActBlockConfig::block([64, 128], 5, 2).init(device),
            conv3: Conv2dActBlockConfig::block([128, 256], 5, 2).init(device),
            conv3_1: Conv2dActBlockConfig::block([256, 256], 3, 1).init(device),
            conv4: Conv2dActBlockConfig::block([256, 512], 3, 2).init(device),
            conv4_1: Conv2dActBlockConfig::block([512, 512], 3, 1).init(device),
            conv5: Conv2dActBlockConfig::block([512, 512], 3, 2).init(device),
            conv5_1: Conv2dActBlockConfig::block([512, 512], 3, 1).init(device),
            conv6: Conv2dActBlockConfig::block([512, 1024], 3, 2).init(device),
            conv6_1: Conv2dActBlockConfig::block([1024, 1024], 3, 1).init(device),

            decoder: FlowDecoderConfig::new().init(device),
            loss: self.loss.init(),
        }
    }
}

/// The stacked network.
#[derive(Module, Debug)]
pub struct FlowNetS<B: Backend> {
    conv1: Conv2dActBlock<B>,
    conv2: Conv2dActBlock<B>,
    conv3: Conv2dActBlock<B>,
    conv3_1: Conv2dActBlock<B>,
    conv4: Conv2dActBlock<B>,
    conv4_1: Conv2dActBlock<B>,
    conv5: Conv2dActBlock<B>,
    conv5_1: Conv2dActBlock<B>,
    conv6: Conv2dActBlock<B>,
    conv6_1: Conv2dActBlock<B>,

    decoder: FlowDecoder<B>,
    loss: MultiScaleEpeLoss,
}

impl<B: Backend> FlowNetS<B> {
    /// Input channels this tower was built for.
    pub fn input_channels(&self) -> usize {
        use crate::layers::blocks::conv_act::Conv2dActBlockMeta;
        self.conv1.in_channels()
    }

    /// Run the tower on an already-stacked channel tensor.
    pub fn forward_features(
        &self,
        stacked: Tensor<B, 4>,
    ) -> FlowPredictions<B> {
        let [_, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &stacked,
            &["batch", "height", "width"],
            &[("channels", self.input_channels())],
        );

        let c1 = self.conv1.forward(stacked);
        let c2 = self.conv2.forward(c1);
        let c3_1 = self.conv3_1.forward(self.conv3.forward(c2.clone()));
        let c4_1 = self.conv4_1.forward(self.conv4.forward(c3_1.clone()));
        let c5_1 = self.conv5_1.forward(self.conv5.forward(c4_1.clone()));
        let c6_1 = self.conv6_1.forward(self.conv6.forward(c5_1.clone()));

        let pyramid = self.decoder.forward(c2, c3_1, c4_1, c5_1, c6_1);
        let flow = full_resolution_flow(pyramid[0].clone(), [height, width]);

        FlowPredictions { flow, pyramid }
    }

    /// Refine an upstream stage's estimate.
    pub fn forward_stage(
        &self,
        stage: StageInput<B>,
    ) -> FlowPredictions<B> {
        self.forward_features(stage.into_channels())
    }
}

impl<B: Backend> FlowEstimator<B> for FlowNetS<B> {
    fn forward(
        &self,
        input: FlowInput<B>,
    ) -> FlowPredictions<B> {
        self.forward_features(Tensor::cat(vec![input.image_a, input.image_b], 1))
    }

    fn loss(
        &self,
        target: Tensor<B, 4>,
        predictions: &FlowPredictions<B>,
    ) -> Tensor<B, 1> {
        self.loss.forward(target, &predictions.pyramid)
    }
}
