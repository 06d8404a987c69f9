#![warn(missing_docs)]
//!# burnflow - Optical Flow Networks for Burn
//!
//! ## Notable Components
//!
//! * [`flowio`] - flow-field file codec, color rendering, and image I/O.
//!   * [`flowio::codec`] - the ``.flo`` binary format.
//!   * [`flowio::color`] - Middlebury color-wheel visualization.
//! * [`ops`] - flow-specific tensor operators.
//!   * [`ops::warp`] - differentiable bilinear flow warping.
//!   * [`ops::correlation`] - bounded-displacement cost volume.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::conv_act`] - ``Conv2d + LeakyReLU`` block.
//!   * [`layers::blocks::deconv_act`] - ``ConvTranspose2d + LeakyReLU`` block.
//! * [`models`] - complete model families.
//!   * [`models::flownet`] - The FlowNet Family.
//! * [`runner`] - training and inference drivers.

extern crate core;

pub mod flowio;

pub mod layers;

pub mod models;
pub mod ops;
pub mod runner;
