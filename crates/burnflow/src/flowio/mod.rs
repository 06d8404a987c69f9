//! # Flow Field I/O
//!
//! Host-side representation of a dense flow field, the ``.flo`` binary
//! codec, the Middlebury color-wheel renderer, and image/tensor
//! conversion helpers.

pub mod codec;
pub mod color;
pub mod image;

/// A dense optical flow field on the host.
///
/// Row-major, one `(dx, dy)` pair per pixel, displacements in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FlowField {
    /// Wrap an interleaved `(dx, dy)` buffer.
    ///
    /// # Panics
    ///
    /// If `data.len() != width * height * 2`.
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f32>,
    ) -> Self {
        assert_eq!(
            data.len(),
            width * height * 2,
            "flow buffer must hold width * height (dx, dy) pairs"
        );
        Self {
            width,
            height,
            data,
        }
    }

    /// An all-zero flow field.
    pub fn zeros(
        width: usize,
        height: usize,
    ) -> Self {
        Self::new(width, height, vec![0.0; width * height * 2])
    }

    /// A constant-translation flow field.
    pub fn constant(
        width: usize,
        height: usize,
        dx: f32,
        dy: f32,
    ) -> Self {
        let mut data = Vec::with_capacity(width * height * 2);
        for _ in 0..width * height {
            data.push(dx);
            data.push(dy);
        }
        Self::new(width, height, data)
    }

    /// Field width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Field height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The interleaved `(dx, dy)` buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// The `(dx, dy)` displacement at a pixel.
    pub fn get(
        &self,
        x: usize,
        y: usize,
    ) -> [f32; 2] {
        let i = (y * self.width + x) * 2;
        [self.data[i], self.data[i + 1]]
    }

    /// Overwrite the displacement at a pixel.
    pub fn set(
        &mut self,
        x: usize,
        y: usize,
        value: [f32; 2],
    ) {
        let i = (y * self.width + x) * 2;
        self.data[i] = value[0];
        self.data[i + 1] = value[1];
    }
}
