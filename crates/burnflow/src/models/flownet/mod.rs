//! # The FlowNet Family
//!
//! Dense optical flow estimators:
//!
//! * [`flownet_c::FlowNetC`] - siamese feature towers, an explicit
//!   correlation cost volume, and a coarse-to-fine refinement decoder.
//! * [`flownet_s::FlowNetS`] - a single encoder-decoder tower over a
//!   stacked multi-channel input.
//! * [`compose`] - chained variants (`FlowNetCS`, `FlowNetCSS`,
//!   `FlowNet2`) that freeze upstream stages and feed warped images,
//!   brightness error, and a scaled flow estimate between stages.
//!
//! All variants implement [`estimator::FlowEstimator`]: a `forward` that
//! yields multi-scale flow predictions and a `loss` that reduces them
//! against ground truth to a scalar.
//!
//! ## Example
//!
//! ```rust,no_run
//! use burnflow::models::flownet::estimator::{FlowEstimator, FlowInput};
//! use burnflow::models::flownet::flownet_c::FlowNetCConfig;
//! use burn::backend::NdArray;
//! use burn::prelude::Tensor;
//!
//! let device = Default::default();
//! let net = FlowNetCConfig::new().init::<NdArray>(&device);
//!
//! let image_a = Tensor::zeros([1, 3, 64, 64], &device);
//! let image_b = Tensor::zeros([1, 3, 64, 64], &device);
//! let predictions = net.forward(FlowInput::new(image_a, image_b));
//! assert_eq!(predictions.flow.dims(), [1, 2, 64, 64]);
//! ```

pub mod compose;
pub mod decoder;
pub mod estimator;
pub mod flownet_c;
pub mod flownet_s;
pub mod loss;
