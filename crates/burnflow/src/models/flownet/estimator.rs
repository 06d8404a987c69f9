//! # The Flow Estimator Interface
//!
//! Every network variant exposes the same two operations: build flow
//! predictions from an image pair, and reduce predictions against ground
//! truth to a scalar loss. Composite variants own their sub-networks and
//! delegate both operations to the final stage.

use bimm_contracts::{assert_shape_contract, unpack_shape_contract};
use burn::prelude::{Backend, Tensor};

/// Input pair dimensions must be divisible by this (six stride-2
/// encoder levels).
pub const RESOLUTION_DIVISOR: usize = 64;

/// An image pair to estimate flow between.
#[derive(Debug, Clone)]
pub struct FlowInput<B: Backend> {
    /// First image, ``[batch, 3, height, width]`` BGR in `[0, 1]`.
    pub image_a: Tensor<B, 4>,

    /// Second image, same shape as `image_a`.
    pub image_b: Tensor<B, 4>,
}

impl<B: Backend> FlowInput<B> {
    /// Bundle an image pair.
    ///
    /// # Panics
    ///
    /// If the images disagree in shape, or height/width are not
    /// divisible by [`RESOLUTION_DIVISOR`].
    pub fn new(
        image_a: Tensor<B, 4>,
        image_b: Tensor<B, 4>,
    ) -> Self {
        let [batch, channels, height, width] = unpack_shape_contract!(
            [
                "batch",
                "channels",
                "height" = "height_units" * "divisor",
                "width" = "width_units" * "divisor"
            ],
            &image_a,
            &["batch", "channels", "height", "width"],
            &[("divisor", RESOLUTION_DIVISOR)],
        );
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &image_b,
            &[
                ("batch", batch),
                ("channels", channels),
                ("height", height),
                ("width", width)
            ],
        );

        Self { image_a, image_b }
    }

    /// Batch size.
    pub fn batch_size(&self) -> usize {
        self.image_a.dims()[0]
    }

    /// `[height, width]` of the pair.
    pub fn resolution(&self) -> [usize; 2] {
        let [_, _, height, width] = self.image_a.dims();
        [height, width]
    }
}

/// Multi-scale flow predictions.
#[derive(Debug, Clone)]
pub struct FlowPredictions<B: Backend> {
    /// Full-resolution flow in pixel units, ``[batch, 2, height, width]``.
    pub flow: Tensor<B, 4>,

    /// Decoder predictions, finest first (`flow2` .. `flow6`), in the
    /// decoder's internal 1/20-pixel units.
    pub pyramid: Vec<Tensor<B, 4>>,
}

/// A dense optical flow estimator.
///
/// Both operations are deterministic, pure functions of their inputs
/// given fixed parameters.
pub trait FlowEstimator<B: Backend> {
    /// Estimate flow for an image pair.
    fn forward(
        &self,
        input: FlowInput<B>,
    ) -> FlowPredictions<B>;

    /// Total loss of predictions against ground-truth flow.
    ///
    /// # Arguments
    ///
    /// - `target`: ``[batch, 2, height, width]`` ground truth in pixel
    ///   units at the input resolution.
    /// - `predictions`: the output of [`FlowEstimator::forward`].
    fn loss(
        &self,
        target: Tensor<B, 4>,
        predictions: &FlowPredictions<B>,
    ) -> Tensor<B, 1>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_flow_input_accessors() {
        let device = Default::default();
        let input = FlowInput::<B>::new(
            Tensor::zeros([2, 3, 64, 128], &device),
            Tensor::zeros([2, 3, 64, 128], &device),
        );
        assert_eq!(input.batch_size(), 2);
        assert_eq!(input.resolution(), [64, 128]);
    }

    #[test]
    #[should_panic]
    fn test_flow_input_rejects_unaligned_resolution() {
        let device = Default::default();
        FlowInput::<B>::new(
            Tensor::zeros([1, 3, 60, 60], &device),
            Tensor::zeros([1, 3, 60, 60], &device),
        );
    }

    #[test]
    #[should_panic]
    fn test_flow_input_rejects_mismatched_pair() {
        let device = Default::default();
        FlowInput::<B>::new(
            Tensor::zeros([1, 3, 64, 64], &device),
            Tensor::zeros([1, 3, 64, 128], &device),
        );
    }
}
