//! # Image / Tensor Conversion
//!
//! Network inputs are `[batch, 3, height, width]` tensors in BGR channel
//! order with values in `[0, 1]`; files on disk are ordinary RGB images.
//! The conversion happens here, at the outermost boundary.

use crate::flowio::FlowField;
use anyhow::Context;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use image::RgbImage;
use std::path::Path;

/// Load an image file as a `[1, 3, height, width]` BGR tensor in `[0, 1]`.
pub fn load_image_tensor<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<Tensor<B, 4>> {
    let image = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .to_rgb8();
    Ok(rgb_image_to_tensor(&image, device))
}

/// Convert an RGB image buffer to a `[1, 3, height, width]` BGR tensor.
pub fn rgb_image_to_tensor<B: Backend>(
    image: &RgbImage,
    device: &B::Device,
) -> Tensor<B, 4> {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);

    let mut data = Vec::with_capacity(3 * height * width);
    // RGB storage -> BGR planes.
    for channel in [2usize, 1, 0] {
        for y in 0..height {
            for x in 0..width {
                let px = image.get_pixel(x as u32, y as u32);
                data.push(px.0[channel] as f32 / 255.0);
            }
        }
    }

    Tensor::from_data(TensorData::new(data, [1, 3, height, width]), device)
}

/// Convert a `[1, 3, height, width]` BGR tensor in `[0, 1]` back to RGB.
pub fn tensor_to_rgb_image<B: Backend>(image: Tensor<B, 4>) -> RgbImage {
    let [_, channels, height, width] = image.dims();
    assert_eq!(channels, 3, "expected a 3-channel image tensor");

    let data = image
        .to_data()
        .to_vec::<f32>()
        .expect("image tensor should convert to f32");

    let plane = height * width;
    let mut out = RgbImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            // Planes are B, G, R.
            let b = (data[i] * 255.0).round().clamp(0.0, 255.0) as u8;
            let g = (data[plane + i] * 255.0).round().clamp(0.0, 255.0) as u8;
            let r = (data[2 * plane + i] * 255.0).round().clamp(0.0, 255.0) as u8;
            out.put_pixel(x as u32, y as u32, image::Rgb([r, g, b]));
        }
    }
    out
}

/// Extract batch element 0 of a `[batch, 2, height, width]` flow tensor.
pub fn flow_tensor_to_field<B: Backend>(flow: Tensor<B, 4>) -> FlowField {
    let [_, channels, height, width] = flow.dims();
    assert_eq!(channels, 2, "expected a 2-channel flow tensor");

    let data = flow
        .narrow(0, 0, 1)
        .to_data()
        .to_vec::<f32>()
        .expect("flow tensor should convert to f32");

    let plane = height * width;
    let mut out = Vec::with_capacity(plane * 2);
    for i in 0..plane {
        out.push(data[i]);
        out.push(data[plane + i]);
    }
    FlowField::new(width, height, out)
}

/// Lift a host flow field to a `[1, 2, height, width]` tensor.
pub fn field_to_tensor<B: Backend>(
    field: &FlowField,
    device: &B::Device,
) -> Tensor<B, 4> {
    let (width, height) = (field.width(), field.height());
    let plane = width * height;

    let mut data = vec![0.0f32; plane * 2];
    for i in 0..plane {
        data[i] = field.data()[i * 2];
        data[plane + i] = field.data()[i * 2 + 1];
    }

    Tensor::from_data(TensorData::new(data, [1, 2, height, width]), device)
}
