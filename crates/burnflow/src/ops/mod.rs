//! # Flow Tensor Operators.

pub mod correlation;
pub mod warp;
