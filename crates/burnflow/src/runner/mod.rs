//! # Training and Inference Drivers
//!
//! * [`schedule`] - piecewise-constant learning rate schedules.
//! * [`trainer`] - the custom optimization loop.
//! * [`inference`] - single-pair inference with artifact output.

pub mod inference;
pub mod schedule;
pub mod trainer;
