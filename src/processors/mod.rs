//! Data transformation building blocks: box geometry and binary masks.

pub mod geometry;
pub mod mask;

pub use geometry::{adapt_boxes, BoundingBox, BoxPrompt};
pub use mask::Mask;
