//! # `ConvAct` Module
//!
//! A [`Conv2dActBlock`] module is a [`Conv2d`] layer followed by a leaky
//! ReLU activation; the basic encoder unit of the flow networks.

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::leaky_relu;

/// Negative slope shared by every activation in the flow networks.
pub const LEAKY_RELU_SLOPE: f64 = 0.1;

/// [`Conv2dActBlock`] Meta.
pub trait Conv2dActBlockMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> &[usize; 2];
}

/// [`Conv2dActBlock`] Config.
#[derive(Config, Debug)]
pub struct Conv2dActBlockConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// Leaky ReLU negative slope.
    #[config(default = 0.1)]
    pub negative_slope: f64,
}

impl Conv2dActBlockMeta for Conv2dActBlockConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> &[usize; 2] {
        &self.conv.stride
    }
}

impl From<Conv2dConfig> for Conv2dActBlockConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self {
            conv,
            negative_slope: LEAKY_RELU_SLOPE,
        }
    }
}

impl Conv2dActBlockConfig {
    /// A square convolution with `(kernel - 1) / 2` padding, the
    /// flow-network default geometry.
    pub fn block(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
    ) -> Self {
        let pad = (kernel - 1) / 2;
        Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .into()
    }

    /// Initialize a [`Conv2dActBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Conv2dActBlock<B> {
        Conv2dActBlock {
            conv: self.conv.init(device),
            negative_slope: self.negative_slope,
        }
    }
}

/// [`Conv2d`] followed by a leaky ReLU.
#[derive(Module, Debug)]
pub struct Conv2dActBlock<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Leaky ReLU negative slope.
    pub negative_slope: f64,
}

impl<B: Backend> Conv2dActBlockMeta for Conv2dActBlock<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> &[usize; 2] {
        &self.conv.stride
    }
}

impl<B: Backend> Conv2dActBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, out_height * stride, out_width * stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "height_stride",
                "in_width" = "out_width" * "width_stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("height_stride", self.stride()[0]),
                ("width_stride", self.stride()[1]),
            ]
        );

        let x = self.conv.forward(input);
        let x = leaky_relu(x, self.negative_slope);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
