//! # Flow Visualization
//!
//! Middlebury color-wheel rendering: hue encodes flow direction,
//! saturation encodes magnitude normalized by the largest valid
//! displacement in the field. Deterministic for identical input.

use crate::flowio::FlowField;
use image::{Rgb, RgbImage};

/// Displacements at or above this magnitude mark unknown/invalid pixels.
pub const UNKNOWN_FLOW_THRESH: f32 = 1e7;

const RY: usize = 15;
const YG: usize = 6;
const GC: usize = 4;
const CB: usize = 11;
const BM: usize = 13;
const MR: usize = 6;
const NCOLS: usize = RY + YG + GC + CB + BM + MR;

/// Render a flow field to an RGB image.
///
/// Invalid (sentinel) pixels render black and do not participate in the
/// magnitude normalization.
///
/// # Returns
///
/// The rendered image and the mean magnitude over valid pixels.
pub fn flow_to_image(flow: &FlowField) -> (RgbImage, f32) {
    let width = flow.width();
    let height = flow.height();

    let mut max_rad = f32::MIN_POSITIVE;
    let mut rad_sum = 0.0f64;
    let mut valid = 0usize;
    for y in 0..height {
        for x in 0..width {
            let [u, v] = flow.get(x, y);
            if !is_valid(u, v) {
                continue;
            }
            let rad = (u * u + v * v).sqrt();
            max_rad = max_rad.max(rad);
            rad_sum += rad as f64;
            valid += 1;
        }
    }
    let mean_magnitude = if valid == 0 {
        0.0
    } else {
        (rad_sum / valid as f64) as f32
    };

    let wheel = color_wheel();
    let mut image = RgbImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let [u, v] = flow.get(x, y);
            let pixel = if is_valid(u, v) {
                compute_color(u / max_rad, v / max_rad, &wheel)
            } else {
                Rgb([0, 0, 0])
            };
            image.put_pixel(x as u32, y as u32, pixel);
        }
    }

    (image, mean_magnitude)
}

fn is_valid(
    u: f32,
    v: f32,
) -> bool {
    u.abs() < UNKNOWN_FLOW_THRESH && v.abs() < UNKNOWN_FLOW_THRESH && !u.is_nan() && !v.is_nan()
}

/// The 55-hue Middlebury color wheel.
fn color_wheel() -> [[f32; 3]; NCOLS] {
    let mut wheel = [[0.0f32; 3]; NCOLS];
    let mut col = 0;

    for i in 0..RY {
        wheel[col + i] = [255.0, 255.0 * i as f32 / RY as f32, 0.0];
    }
    col += RY;
    for i in 0..YG {
        wheel[col + i] = [255.0 - 255.0 * i as f32 / YG as f32, 255.0, 0.0];
    }
    col += YG;
    for i in 0..GC {
        wheel[col + i] = [0.0, 255.0, 255.0 * i as f32 / GC as f32];
    }
    col += GC;
    for i in 0..CB {
        wheel[col + i] = [0.0, 255.0 - 255.0 * i as f32 / CB as f32, 255.0];
    }
    col += CB;
    for i in 0..BM {
        wheel[col + i] = [255.0 * i as f32 / BM as f32, 0.0, 255.0];
    }
    col += BM;
    for i in 0..MR {
        wheel[col + i] = [255.0, 0.0, 255.0 - 255.0 * i as f32 / MR as f32];
    }

    wheel
}

/// Map a magnitude-normalized displacement to a wheel color.
fn compute_color(
    u: f32,
    v: f32,
    wheel: &[[f32; 3]; NCOLS],
) -> Rgb<u8> {
    let rad = (u * u + v * v).sqrt();
    let angle = (-v).atan2(-u) / std::f32::consts::PI;

    let fk = (angle + 1.0) / 2.0 * (NCOLS as f32 - 1.0);
    let k0 = (fk.floor() as usize).min(NCOLS - 1);
    let k1 = (k0 + 1) % NCOLS;
    let f = fk - k0 as f32;

    let mut rgb = [0u8; 3];
    for c in 0..3 {
        let col0 = wheel[k0][c] / 255.0;
        let col1 = wheel[k1][c] / 255.0;
        let mut col = (1.0 - f) * col0 + f * col1;
        if rad <= 1.0 {
            // Larger displacement, more saturation.
            col = 1.0 - rad * (1.0 - col);
        } else {
            col *= 0.75;
        }
        rgb[c] = (255.0 * col).floor() as u8;
    }

    Rgb(rgb)
}
