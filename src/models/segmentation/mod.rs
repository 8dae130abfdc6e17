//! Promptable segmentation models.

pub mod sam;

pub use sam::{SamConfig, SamSegmenter};
