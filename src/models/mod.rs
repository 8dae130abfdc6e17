//! Pure model wrappers around ONNX Runtime sessions.
//!
//! These modules know nothing about the pipeline; they turn tensors into
//! detections and masks and are plugged in through the traits in
//! [`crate::core::traits`].

pub mod detection;
pub mod segmentation;

pub use detection::{OwlVitConfig, OwlVitDetector};
pub use segmentation::{SamConfig, SamSegmenter};
