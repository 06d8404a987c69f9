//! # Endpoint-Error Loss
//!
//! Average endpoint error — the Euclidean distance between predicted and
//! ground-truth flow vectors, summed over pixels and averaged over the
//! batch — accumulated across every decoder scale, with the ground truth
//! rescaled and downsampled to match each level.

use bimm_contracts::assert_shape_contract;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

/// Average endpoint error between two flow tensors.
///
/// `sqrt(sum_over_channels((pred - label)^2))`, summed over all pixels,
/// divided by the batch size. Zero iff the tensors are equal; always
/// non-negative; symmetric in its arguments.
///
/// # Panics
///
/// If the shapes disagree.
pub fn average_endpoint_error<B: Backend>(
    labels: Tensor<B, 4>,
    predictions: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let [batch, channels, height, width] = labels.dims();
    assert_shape_contract!(
        ["batch", "channels", "height", "width"],
        &predictions,
        &[
            ("batch", batch),
            ("channels", channels),
            ("height", height),
            ("width", width)
        ],
    );

    let diff = predictions - labels;
    let epe = diff.powi_scalar(2).sum_dim(1).sqrt();
    epe.sum() / batch as f32
}

/// [`MultiScaleEpeLoss`] Config.
#[derive(Config, Debug)]
pub struct MultiScaleEpeLossConfig {
    /// Scale applied to ground truth before comparison, matching the
    /// decoder's internal flow units.
    #[config(default = 0.05)]
    pub target_scale: f64,

    /// Per-level weights, finest level first; absent levels weigh 1.0.
    #[config(default = "Vec::new()")]
    pub level_weights: Vec<f64>,
}

impl MultiScaleEpeLossConfig {
    /// Initialize a [`MultiScaleEpeLoss`].
    pub fn init(&self) -> MultiScaleEpeLoss {
        MultiScaleEpeLoss {
            target_scale: self.target_scale,
            level_weights: self.level_weights.clone(),
        }
    }
}

/// Multi-scale endpoint-error loss.
#[derive(Module, Clone, Debug)]
pub struct MultiScaleEpeLoss {
    /// Scale applied to ground truth before comparison.
    pub target_scale: f64,

    /// Per-level weights, finest level first.
    pub level_weights: Vec<f64>,
}

impl MultiScaleEpeLoss {
    /// Total loss across every pyramid level.
    ///
    /// # Arguments
    ///
    /// - `target`: ``[batch, 2, height, width]`` ground truth in pixel
    ///   units at the input resolution.
    /// - `pyramid`: decoder predictions, finest first.
    pub fn forward<B: Backend>(
        &self,
        target: Tensor<B, 4>,
        pyramid: &[Tensor<B, 4>],
    ) -> Tensor<B, 1> {
        assert!(!pyramid.is_empty(), "loss requires at least one prediction");

        let scaled = target * self.target_scale;

        let mut total: Option<Tensor<B, 1>> = None;
        for (level, prediction) in pyramid.iter().enumerate() {
            let [_, _, height, width] = prediction.dims();
            let level_target = interpolate(
                scaled.clone(),
                [height, width],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            );

            let weight = self.level_weights.get(level).copied().unwrap_or(1.0);
            let term = average_endpoint_error(level_target, prediction.clone()) * weight;

            total = Some(match total {
                Some(acc) => acc + term,
                None => term,
            });
        }

        total.expect("pyramid is non-empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    fn scalar(tensor: Tensor<B, 1>) -> f32 {
        tensor.into_scalar()
    }

    #[test]
    fn test_epe_zero_iff_equal() {
        let device = Default::default();
        let flow = Tensor::<B, 4>::full([2, 2, 4, 4], 3.0, &device);

        let zero = scalar(average_endpoint_error(flow.clone(), flow.clone()));
        assert_eq!(zero, 0.0);

        let shifted = flow.clone() + 0.5;
        let nonzero = scalar(average_endpoint_error(flow, shifted));
        assert!(nonzero > 0.0);
    }

    #[test]
    fn test_epe_symmetric_and_nonnegative() {
        let device = Default::default();
        let a = Tensor::<B, 4>::full([1, 2, 2, 2], 1.0, &device);
        let b = Tensor::<B, 4>::full([1, 2, 2, 2], -2.0, &device);

        let ab = scalar(average_endpoint_error(a.clone(), b.clone()));
        let ba = scalar(average_endpoint_error(b, a));
        assert!(ab > 0.0);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_epe_known_value() {
        let device = Default::default();
        // dx error 3, dy error 4 at every pixel -> per-pixel EPE 5.
        let labels = Tensor::<B, 4>::zeros([1, 2, 2, 2], &device);
        let data = TensorData::new(
            vec![3.0f32, 3.0, 3.0, 3.0, 4.0, 4.0, 4.0, 4.0],
            [1, 2, 2, 2],
        );
        let predictions = Tensor::from_data(data, &device);

        // Sum over 4 pixels / batch 1.
        let value = scalar(average_endpoint_error(labels, predictions));
        assert!((value - 20.0).abs() < 1e-5);
    }

    #[test]
    #[should_panic]
    fn test_epe_shape_mismatch_is_fatal() {
        let device = Default::default();
        let labels = Tensor::<B, 4>::zeros([1, 2, 4, 4], &device);
        let predictions = Tensor::<B, 4>::zeros([1, 2, 2, 2], &device);
        average_endpoint_error(labels, predictions);
    }

    #[test]
    fn test_multi_scale_zero_for_exact_prediction() {
        let device = Default::default();
        let loss = MultiScaleEpeLossConfig::new().init();

        // Constant ground truth survives bilinear downsampling exactly.
        let target = Tensor::<B, 4>::full([1, 2, 8, 8], 10.0, &device);
        let pyramid = vec![
            Tensor::<B, 4>::full([1, 2, 4, 4], 0.5, &device),
            Tensor::<B, 4>::full([1, 2, 2, 2], 0.5, &device),
        ];

        let value: f32 = loss.forward(target, &pyramid).into_scalar();
        assert!(value.abs() < 1e-5);
    }

    #[test]
    fn test_multi_scale_level_weights() {
        let device = Default::default();
        let target = Tensor::<B, 4>::zeros([1, 2, 8, 8], &device);
        let pyramid = vec![Tensor::<B, 4>::full([1, 2, 4, 4], 1.0, &device)];

        let unweighted: f32 = MultiScaleEpeLossConfig::new()
            .init()
            .forward(target.clone(), &pyramid)
            .into_scalar();
        let weighted: f32 = MultiScaleEpeLossConfig::new()
            .with_level_weights(vec![0.5])
            .init()
            .forward(target, &pyramid)
            .into_scalar();

        assert!((weighted * 2.0 - unweighted).abs() < 1e-5);
    }
}
