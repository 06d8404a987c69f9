//! # Correlation Cost Volume
//!
//! For every spatial location of feature map A, the channel-mean dot
//! product against a bounded neighborhood of feature map B: the one
//! architecture-specific operator of the correlation network.
//!
//! Displacements run over `(-max_displacement..=max_displacement)` in
//! both axes at `stride` spacing, ordered row-major from
//! `(-max, -max)` to `(+max, +max)`; map B is zero-padded so every
//! displacement stays defined at the borders.

use bimm_contracts::{assert_shape_contract, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// [`Correlation`] Config.
#[derive(Config, Debug)]
pub struct CorrelationConfig {
    /// Maximum displacement radius, in feature-map pixels.
    #[config(default = 20)]
    pub max_displacement: usize,

    /// Spacing between sampled displacements.
    #[config(default = 2)]
    pub stride: usize,
}

impl CorrelationConfig {
    /// Displacements sampled along one axis.
    pub fn displacements_per_axis(&self) -> usize {
        2 * (self.max_displacement / self.stride) + 1
    }

    /// Number of output channels (`displacements_per_axis` squared).
    pub fn out_channels(&self) -> usize {
        let d = self.displacements_per_axis();
        d * d
    }

    /// Initialize a [`Correlation`].
    ///
    /// # Panics
    ///
    /// If `stride` is zero or does not divide `max_displacement`.
    pub fn init(&self) -> Correlation {
        assert!(self.stride >= 1, "correlation stride must be >= 1");
        assert_eq!(
            self.max_displacement % self.stride,
            0,
            "correlation stride must divide max_displacement"
        );
        Correlation {
            max_displacement: self.max_displacement,
            stride: self.stride,
        }
    }
}

/// Bounded-displacement correlation layer.
#[derive(Module, Clone, Debug)]
pub struct Correlation {
    /// Maximum displacement radius, in feature-map pixels.
    pub max_displacement: usize,

    /// Spacing between sampled displacements.
    pub stride: usize,
}

impl Correlation {
    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        let d = 2 * (self.max_displacement / self.stride) + 1;
        d * d
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `a`, `b`: ``[batch, channels, height, width]`` feature maps of
    ///   identical shape.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, height, width]`` cost volume.
    pub fn forward<B: Backend>(
        &self,
        a: Tensor<B, 4>,
        b: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, channels, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &a,
            &["batch", "channels", "height", "width"],
        );
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &b,
            &[
                ("batch", batch),
                ("channels", channels),
                ("height", height),
                ("width", width)
            ],
        );

        let pad = self.max_displacement;
        let padded = b.pad((pad, pad, pad, pad), 0.0);

        let mut maps = Vec::with_capacity(self.out_channels());
        for dy in (0..=2 * pad).step_by(self.stride) {
            for dx in (0..=2 * pad).step_by(self.stride) {
                let shifted = padded.clone().slice([
                    0..batch,
                    0..channels,
                    dy..dy + height,
                    dx..dx + width,
                ]);
                maps.push((a.clone() * shifted).mean_dim(1));
            }
        }

        Tensor::cat(maps, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    #[test]
    fn test_correlation_config() {
        let config = CorrelationConfig::new();
        assert_eq!(config.max_displacement, 20);
        assert_eq!(config.stride, 2);
        assert_eq!(config.displacements_per_axis(), 21);
        assert_eq!(config.out_channels(), 441);

        let config = config.with_max_displacement(2).with_stride(1);
        assert_eq!(config.out_channels(), 25);
    }

    #[test]
    #[should_panic(expected = "stride must divide")]
    fn test_stride_must_divide_radius() {
        CorrelationConfig::new()
            .with_max_displacement(3)
            .with_stride(2)
            .init();
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let corr = CorrelationConfig::new()
            .with_max_displacement(4)
            .with_stride(2)
            .init();

        let a = Tensor::<B, 4>::ones([2, 8, 6, 6], &device);
        let b = Tensor::<B, 4>::ones([2, 8, 6, 6], &device);

        let volume = corr.forward(a, b);
        assert_eq!(volume.dims(), [2, 25, 6, 6]);
    }

    #[test]
    fn test_identical_inputs_center_channel() {
        let device = Default::default();
        let corr = CorrelationConfig::new()
            .with_max_displacement(1)
            .with_stride(1)
            .init();

        // 1x2x3x3: channel 0 all 2s, channel 1 all 4s.
        let mut data = vec![2.0f32; 9];
        data.extend(vec![4.0f32; 9]);
        let a = Tensor::<B, 4>::from_data(TensorData::new(data, [1, 2, 3, 3]), &device);

        let volume = corr.forward(a.clone(), a);
        assert_eq!(volume.dims(), [1, 9, 3, 3]);

        // Zero displacement is channel 4 of the 3x3 grid; value is the
        // channel-mean self dot product: (2*2 + 4*4) / 2 = 10.
        let center = volume.narrow(1, 4, 1).to_data().to_vec::<f32>().unwrap();
        for v in center {
            assert!((v - 10.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_border_displacements_hit_zero_padding() {
        let device = Default::default();
        let corr = CorrelationConfig::new()
            .with_max_displacement(1)
            .with_stride(1)
            .init();

        let a = Tensor::<B, 4>::ones([1, 1, 2, 2], &device);
        let volume = corr.forward(a.clone(), a);

        // Channel 0 pairs each pixel with its (-1, -1) neighbor; for the
        // top-left pixel that neighbor is padding.
        let top_left = volume
            .narrow(1, 0, 1)
            .to_data()
            .to_vec::<f32>()
            .unwrap()[0];
        assert_eq!(top_left, 0.0);
    }
}
