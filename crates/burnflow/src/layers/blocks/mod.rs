//! # Miscellaneous Blocks.

pub mod conv_act;
pub mod deconv_act;
