//! Zero-shot object detection models.

pub mod owlvit;

pub use owlvit::{OwlVitConfig, OwlVitDetector};
