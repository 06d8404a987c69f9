//! # FlowNetC - The Correlation Network
//!
//! Two weight-shared feature towers process the images independently
//! down to 1/8 resolution; an explicit cost volume correlates them; a
//! 1x1 "redirect" convolution carries tower A's own features past the
//! correlation; the fused map runs through the deep encoder and the
//! coarse-to-fine refinement decoder.

use crate::layers::blocks::conv_act::{Conv2dActBlock, Conv2dActBlockConfig, LEAKY_RELU_SLOPE};
use crate::models::flownet::decoder::{FlowDecoder, FlowDecoderConfig, full_resolution_flow};
use crate::models::flownet::estimator::{FlowEstimator, FlowInput, FlowPredictions};
use crate::models::flownet::loss::{MultiScaleEpeLoss, MultiScaleEpeLossConfig};
use crate::ops::correlation::{Correlation, CorrelationConfig};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::leaky_relu;

/// [`FlowNetC`] Config.
#[derive(Config, Debug)]
pub struct FlowNetCConfig {
    /// Correlation layer geometry.
    #[config(default = "CorrelationConfig::new()")]
    pub correlation: CorrelationConfig,

    /// Loss configuration.
    #[config(default = "MultiScaleEpeLossConfig::new()")]
    pub loss: MultiScaleEpeLossConfig,
}

impl FlowNetCConfig {
    /// Initialize a [`FlowNetC`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FlowNetC<B> {
        let corr_channels = self.correlation.out_channels();
        let fused_channels = corr_channels + 32;

        FlowNetC {
            tower: FeatureTower {
                conv1: Conv2dActBlockConfig::block([3, 64], 7, 2).init(device),
                conv2: Conv2dActBlockConfig::block([64, 128], 5, 2).init(device),
                conv3: Conv2dActBlockConfig::block([128, 256], 5, 2).init(device),
            },
            correlation: self.correlation.init(),
            conv_redir: Conv2dActBlockConfig::block([256, 32], 1, 1).init(device),

            conv3_1: Conv2dActBlockConfig::block([fused_channels, 256], 3, 1).init(device),
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

/// The shared (siamese) feature tower: conv1/conv2/conv3 applied to each
/// image with one set of weights.
#[derive(Module, Debug)]
pub struct FeatureTower<B: Backend> {
    conv1: Conv2dActBlock<B>,
    conv2: Conv2dActBlock<B>,
    conv3: Conv2dActBlock<B>,
}

impl<B: Backend> FeatureTower<B> {
    /// Features at 1/4 (`conv2`) and 1/8 (`conv3`) resolution.
    pub fn forward(
        &self,
        image: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let c1 = self.conv1.forward(image);
        let c2 = self.conv2.forward(c1);
        let c3 = self.conv3.forward(c2.clone());
        (c2, c3)
    }
}

/// The correlation network.
#[derive(Module, Debug)]
pub struct FlowNetC<B: Backend> {
    tower: FeatureTower<B>,
    correlation: Correlation,
    conv_redir: Conv2dActBlock<B>,

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

impl<B: Backend> FlowEstimator<B> for FlowNetC<B> {
    fn forward(
        &self,
        input: FlowInput<B>,
    ) -> FlowPredictions<B> {
        let resolution = input.resolution();

        let (c2a, c3a) = self.tower.forward(input.image_a);
        let (_c2b, c3b) = self.tower.forward(input.image_b);

        let volume = leaky_relu(
            self.correlation.forward(c3a.clone(), c3b),
            LEAKY_RELU_SLOPE,
        );
        let redirect = self.conv_redir.forward(c3a);
        let fused = Tensor::cat(vec![volume, redirect], 1);

        let c3_1 = self.conv3_1.forward(fused);
        let c4_1 = self.conv4_1.forward(self.conv4.forward(c3_1.clone()));
        let c5_1 = self.conv5_1.forward(self.conv5.forward(c4_1.clone()));
        let c6_1 = self.conv6_1.forward(self.conv6.forward(c5_1.clone()));

        let pyramid = self.decoder.forward(c2a, c3_1, c4_1, c5_1, c6_1);
        let flow = full_resolution_flow(pyramid[0].clone(), resolution);

        FlowPredictions { flow, pyramid }
    }

    fn loss(
        &self,
        target: Tensor<B, 4>,
        predictions: &FlowPredictions<B>,
    ) -> Tensor<B, 1> {
        self.loss.forward(target, &predictions.pyramid)
    }
}
