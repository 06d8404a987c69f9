//! # Flow Warping
//!
//! Resamples an image according to a flow field: output pixel `(x, y)`
//! samples the input at `(x + dx, y + dy)` with bilinear interpolation.
//! Samples whose true position falls outside the image are zero-filled;
//! corner lookups clamp so the gather index stays in range.
//!
//! The operator is differentiable with respect to the image (through the
//! gather) and the flow (through the interpolation weights), which is
//! what lets warped images sit inside a loss-bearing pipeline.

use bimm_contracts::{assert_shape_contract, unpack_shape_contract};
use burn::prelude::{Backend, Int, Tensor};

/// Warp an image by a flow field.
///
/// # Arguments
///
/// - `image`: ``[batch, channels, height, width]``.
/// - `flow`: ``[batch, 2, height, width]``, channel 0 = dx, channel 1 = dy,
///   displacements in pixels.
///
/// # Returns
///
/// The resampled ``[batch, channels, height, width]`` image.
pub fn flow_warp<B: Backend>(
    image: Tensor<B, 4>,
    flow: Tensor<B, 4>,
) -> Tensor<B, 4> {
    let [batch, channels, height, width] = unpack_shape_contract!(
        ["batch", "channels", "height", "width"],
        &image,
        &["batch", "channels", "height", "width"],
    );
    assert_shape_contract!(
        ["batch", "flow_channels", "height", "width"],
        &flow,
        &[
            ("batch", batch),
            ("flow_channels", 2),
            ("height", height),
            ("width", width)
        ],
    );

    let device = image.device();
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    // Base sampling grid.
    let grid_x = Tensor::<B, 1, Int>::arange(0..width as i64, &device)
        .float()
        .reshape([1, 1, 1, width])
        .expand([batch, 1, height, width]);
    let grid_y = Tensor::<B, 1, Int>::arange(0..height as i64, &device)
        .float()
        .reshape([1, 1, height, 1])
        .expand([batch, 1, height, width]);

    let sample_x = grid_x + flow.clone().narrow(1, 0, 1);
    let sample_y = grid_y + flow.narrow(1, 1, 1);

    let x0 = sample_x.clone().floor();
    let y0 = sample_y.clone().floor();
    let wx = sample_x.clone() - x0.clone();
    let wy = sample_y.clone() - y0.clone();

    let x0c = x0.clone().clamp(0.0, max_x);
    let x1c = (x0 + 1.0).clamp(0.0, max_x);
    let y0c = y0.clone().clamp(0.0, max_y);
    let y1c = (y0 + 1.0).clamp(0.0, max_y);

    let flat = image.reshape([batch, channels, height * width]);
    let sample = |xs: &Tensor<B, 4>, ys: &Tensor<B, 4>| -> Tensor<B, 4> {
        let index = (ys.clone() * width as f32 + xs.clone())
            .int()
            .reshape([batch, 1, height * width])
            .expand([batch, channels, height * width]);
        flat.clone()
            .gather(2, index)
            .reshape([batch, channels, height, width])
    };

    let v00 = sample(&x0c, &y0c);
    let v01 = sample(&x1c, &y0c);
    let v10 = sample(&x0c, &y1c);
    let v11 = sample(&x1c, &y1c);

    let inv_wx = -wx.clone() + 1.0;
    let inv_wy = -wy.clone() + 1.0;

    let out = v00 * (inv_wx.clone() * inv_wy.clone())
        + v01 * (wx.clone() * inv_wy)
        + v10 * (inv_wx * wy.clone())
        + v11 * (wx * wy);

    // Zero-fill anything sampled from outside the image.
    let mask = sample_x.clone().greater_equal_elem(0.0).float()
        * sample_x.lower_equal_elem(max_x).float()
        * sample_y.clone().greater_equal_elem(0.0).float()
        * sample_y.lower_equal_elem(max_y).float();

    out * mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    fn ramp_image(device: &<B as Backend>::Device) -> Tensor<B, 4> {
        // 1x1x4x4, value = y * 4 + x.
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        Tensor::from_data(TensorData::new(data, [1, 1, 4, 4]), device)
    }

    fn to_vec(tensor: Tensor<B, 4>) -> Vec<f32> {
        tensor.to_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_zero_flow_is_identity() {
        let device = Default::default();
        let image = ramp_image(&device);
        let flow = Tensor::zeros([1, 2, 4, 4], &device);

        let warped = flow_warp(image.clone(), flow);

        let expected = to_vec(image);
        let actual = to_vec(warped);
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-6, "expected {e}, got {a}");
        }
    }

    #[test]
    fn test_integer_shift_with_zero_fill() {
        let device = Default::default();
        let image = ramp_image(&device);

        // dx = 1 everywhere: output(x) = input(x + 1); last column invalid.
        let dx = Tensor::ones([1, 1, 4, 4], &device);
        let dy = Tensor::zeros([1, 1, 4, 4], &device);
        let flow = Tensor::cat(vec![dx, dy], 1);

        let warped = to_vec(flow_warp(image, flow));
        for y in 0..4 {
            for x in 0..3 {
                let expected = (y * 4 + x + 1) as f32;
                assert!((warped[y * 4 + x] - expected).abs() < 1e-6);
            }
            assert_eq!(warped[y * 4 + 3], 0.0, "out-of-bounds column zero-fills");
        }
    }

    #[test]
    fn test_fractional_shift_interpolates() {
        let device = Default::default();
        let image = ramp_image(&device);

        let dx = Tensor::full([1, 1, 4, 4], 0.5, &device);
        let dy = Tensor::zeros([1, 1, 4, 4], &device);
        let flow = Tensor::cat(vec![dx, dy], 1);

        let warped = to_vec(flow_warp(image, flow));
        // Interior: midpoint between horizontal neighbors.
        assert!((warped[0] - 0.5).abs() < 1e-6);
        assert!((warped[1] - 1.5).abs() < 1e-6);
        assert!((warped[2] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_warp_is_differentiable() {
        type AB = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let image = Tensor::<AB, 4>::ones([1, 1, 4, 4], &device).require_grad();
        let flow = Tensor::<AB, 4>::full([1, 2, 4, 4], 0.25, &device).require_grad();

        let warped = flow_warp(image.clone(), flow.clone());
        let grads = warped.sum().backward();

        assert!(image.grad(&grads).is_some());
        assert!(flow.grad(&grads).is_some());
    }
}
