//! # Coarse-to-Fine Refinement Decoder
//!
//! Shared by the correlation and stacked networks, whose encoders meet
//! it with identical channel counts. From the coarsest features it
//! predicts `flow6`, then at each finer level deconvolves the running
//! features, upsamples the previous flow with a learned transpose
//! convolution, fuses both with the encoder skip, and predicts the next
//! flow — down to `flow2` at 1/4 input resolution.

use crate::layers::blocks::deconv_act::{Deconv2dActBlock, Deconv2dActBlockConfig, upsampling_deconv};
use bimm_contracts::assert_shape_contract_periodically;
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

/// Ratio between pixel units and the decoder's internal flow units.
pub const FLOW_OUTPUT_SCALE: f64 = 20.0;

/// Upsampling factor from the finest decoder level to full resolution.
pub const FLOW_OUTPUT_FACTOR: usize = 4;

/// [`FlowDecoder`] Config; channel counts of the encoder features it
/// receives, coarsest last.
#[derive(Config, Debug)]
pub struct FlowDecoderConfig {
    /// Channels of the 1/4-resolution skip (`conv2`).
    #[config(default = 128)]
    pub skip2_channels: usize,

    /// Channels of the 1/8-resolution skip (`conv3_1`).
    #[config(default = 256)]
    pub skip3_channels: usize,

    /// Channels of the 1/16-resolution skip (`conv4_1`).
    #[config(default = 512)]
    pub skip4_channels: usize,

    /// Channels of the 1/32-resolution skip (`conv5_1`).
    #[config(default = 512)]
    pub skip5_channels: usize,

    /// Channels of the coarsest features (`conv6_1`).
    #[config(default = 1024)]
    pub coarse_channels: usize,
}

impl FlowDecoderConfig {
    /// Initialize a [`FlowDecoder`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> FlowDecoder<B> {
        let fused5 = self.skip5_channels + 512 + 2;
        let fused4 = self.skip4_channels + 256 + 2;
        let fused3 = self.skip3_channels + 128 + 2;
        let fused2 = self.skip2_channels + 64 + 2;

        FlowDecoder {
            predict6: predict_conv(self.coarse_channels).init(device),
            deconv5: Deconv2dActBlockConfig::new([self.coarse_channels, 512]).init(device),
            up6: upsampling_deconv([2, 2]).init(device),

            predict5: predict_conv(fused5).init(device),
            deconv4: Deconv2dActBlockConfig::new([fused5, 256]).init(device),
            up5: upsampling_deconv([2, 2]).init(device),

            predict4: predict_conv(fused4).init(device),
            deconv3: Deconv2dActBlockConfig::new([fused4, 128]).init(device),
            up4: upsampling_deconv([2, 2]).init(device),

            predict3: predict_conv(fused3).init(device),
            deconv2: Deconv2dActBlockConfig::new([fused3, 64]).init(device),
            up3: upsampling_deconv([2, 2]).init(device),

            predict2: predict_conv(fused2).init(device),
        }
    }
}

/// A 3x3 flow-prediction convolution (2 output channels, no activation).
fn predict_conv(in_channels: usize) -> Conv2dConfig {
    Conv2dConfig::new([in_channels, 2], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
}

/// The refinement decoder.
#[derive(Module, Debug)]
pub struct FlowDecoder<B: Backend> {
    predict6: Conv2d<B>,
    deconv5: Deconv2dActBlock<B>,
    up6: ConvTranspose2d<B>,

    predict5: Conv2d<B>,
    deconv4: Deconv2dActBlock<B>,
    up5: ConvTranspose2d<B>,

    predict4: Conv2d<B>,
    deconv3: Deconv2dActBlock<B>,
    up4: ConvTranspose2d<B>,

    predict3: Conv2d<B>,
    deconv2: Deconv2dActBlock<B>,
    up3: ConvTranspose2d<B>,

    predict2: Conv2d<B>,
}

impl<B: Backend> FlowDecoder<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// Encoder features at 1/4, 1/8, 1/16, 1/32, and 1/64 resolution.
    ///
    /// # Returns
    ///
    /// Flow predictions finest first: `[flow2, flow3, flow4, flow5, flow6]`.
    pub fn forward(
        &self,
        skip2: Tensor<B, 4>,
        skip3: Tensor<B, 4>,
        skip4: Tensor<B, 4>,
        skip5: Tensor<B, 4>,
        coarse: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        let flow6 = self.predict6.forward(coarse.clone());

        let fused5 = Tensor::cat(
            vec![
                skip5,
                self.deconv5.forward(coarse),
                self.up6.forward(flow6.clone()),
            ],
            1,
        );
        let flow5 = self.predict5.forward(fused5.clone());

        let fused4 = Tensor::cat(
            vec![
                skip4,
                self.deconv4.forward(fused5),
                self.up5.forward(flow5.clone()),
            ],
            1,
        );
        let flow4 = self.predict4.forward(fused4.clone());

        let fused3 = Tensor::cat(
            vec![
                skip3,
                self.deconv3.forward(fused4),
                self.up4.forward(flow4.clone()),
            ],
            1,
        );
        let flow3 = self.predict3.forward(fused3.clone());

        let fused2 = Tensor::cat(
            vec![
                skip2,
                self.deconv2.forward(fused3),
                self.up3.forward(flow3.clone()),
            ],
            1,
        );
        let flow2 = self.predict2.forward(fused2);

        let [batch, _, height, width] = flow2.dims();
        assert_shape_contract_periodically!(
            ["batch", "flow_channels", "height", "width"],
            &flow3,
            &[
                ("batch", batch),
                ("flow_channels", 2),
                ("height", height / 2),
                ("width", width / 2)
            ]
        );

        vec![flow2, flow3, flow4, flow5, flow6]
    }
}

/// Upsample the finest decoder prediction to full resolution and convert
/// it from internal units to pixel units.
pub fn full_resolution_flow<B: Backend>(
    flow2: Tensor<B, 4>,
    resolution: [usize; 2],
) -> Tensor<B, 4> {
    let upsampled = interpolate(
        flow2,
        resolution,
        InterpolateOptions::new(InterpolateMode::Bilinear),
    );
    upsampled * FLOW_OUTPUT_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_decoder_pyramid_shapes() {
        let device = Default::default();
        let decoder: FlowDecoder<B> = FlowDecoderConfig::new().init(&device);

        // A 64x64 input pair: skips at 16, 8, 4, 2, coarse at 1.
        let pyramid = decoder.forward(
            Tensor::zeros([1, 128, 16, 16], &device),
            Tensor::zeros([1, 256, 8, 8], &device),
            Tensor::zeros([1, 512, 4, 4], &device),
            Tensor::zeros([1, 512, 2, 2], &device),
            Tensor::zeros([1, 1024, 1, 1], &device),
        );

        assert_eq!(pyramid.len(), 5);
        assert_eq!(pyramid[0].dims(), [1, 2, 16, 16]);
        assert_eq!(pyramid[1].dims(), [1, 2, 8, 8]);
        assert_eq!(pyramid[2].dims(), [1, 2, 4, 4]);
        assert_eq!(pyramid[3].dims(), [1, 2, 2, 2]);
        assert_eq!(pyramid[4].dims(), [1, 2, 1, 1]);
    }

    #[test]
    fn test_full_resolution_flow_scaling() {
        let device = Default::default();
        let flow2 = Tensor::<B, 4>::full([1, 2, 4, 4], 0.05, &device);

        let full = full_resolution_flow(flow2, [16, 16]);
        assert_eq!(full.dims(), [1, 2, 16, 16]);

        let data = full.to_data().to_vec::<f32>().unwrap();
        for v in data {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }
}
