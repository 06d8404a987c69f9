//! # Neural Network Layers.

pub mod blocks;
