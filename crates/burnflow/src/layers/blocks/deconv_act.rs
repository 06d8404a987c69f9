//! # `DeconvAct` Module
//!
//! A [`Deconv2dActBlock`] is a 4x4 stride-2 [`ConvTranspose2d`] followed
//! by a leaky ReLU; the decoder unit that doubles spatial resolution.

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{ConvTranspose2d, ConvTranspose2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::leaky_relu;

/// [`Deconv2dActBlock`] Config.
#[derive(Config, Debug)]
pub struct Deconv2dActBlockConfig {
    /// Input/output channels.
    pub channels: [usize; 2],

    /// Leaky ReLU negative slope.
    #[config(default = 0.1)]
    pub negative_slope: f64,
}

impl Deconv2dActBlockConfig {
    /// Initialize a [`Deconv2dActBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Deconv2dActBlock<B> {
        Deconv2dActBlock {
            deconv: upsampling_deconv(self.channels).init(device),
            negative_slope: self.negative_slope,
        }
    }
}

/// The 4x4 stride-2 padding-1 transpose convolution every decoder stage
/// uses; exactly doubles the spatial resolution.
pub fn upsampling_deconv(channels: [usize; 2]) -> ConvTranspose2dConfig {
    ConvTranspose2dConfig::new(channels, [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
}

/// [`ConvTranspose2d`] followed by a leaky ReLU.
#[derive(Module, Debug)]
pub struct Deconv2dActBlock<B: Backend> {
    /// Internal transpose convolution.
    pub deconv: ConvTranspose2d<B>,

    /// Leaky ReLU negative slope.
    pub negative_slope: f64,
}

impl<B: Backend> Deconv2dActBlock<B> {
    /// Number of input channels.
    pub fn in_channels(&self) -> usize {
        self.deconv.weight.shape().dims[0]
    }

    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        self.deconv.weight.shape().dims[1] * self.deconv.groups
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, height * 2, width * 2]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.deconv.forward(input);
        let x = leaky_relu(x, self.negative_slope);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", height * 2),
                ("out_width", width * 2)
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::blocks::conv_act::LEAKY_RELU_SLOPE;
    use burn::backend::NdArray;

    #[test]
    fn test_deconv_act_config() {
        let config = Deconv2dActBlockConfig::new([1024, 512]);
        assert_eq!(config.channels, [1024, 512]);
        assert_eq!(config.negative_slope, LEAKY_RELU_SLOPE);

        let deconv = upsampling_deconv([8, 4]);
        assert_eq!(deconv.kernel_size, [4, 4]);
        assert_eq!(deconv.stride, [2, 2]);
        assert_eq!(deconv.padding, [1, 1]);
    }

    #[test]
    fn test_deconv_act_doubles_resolution() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: Deconv2dActBlock<B> = Deconv2dActBlockConfig::new([8, 4]).init(&device);
        assert_eq!(block.in_channels(), 8);
        assert_eq!(block.out_channels(), 4);

        let input = Tensor::ones([2, 8, 4, 6], &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [2, 4, 8, 12]);
    }
}
