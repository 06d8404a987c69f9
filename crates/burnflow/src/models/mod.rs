//! # Model Families.

pub mod flownet;
