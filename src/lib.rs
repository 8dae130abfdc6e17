//! # detseg
//!
//! A detect → segment → describe pipeline built from pretrained vision
//! models: a zero-shot, open-vocabulary object detector proposes labeled
//! boxes for free-text class names, a promptable segmentation model turns
//! each box into a binary mask, and an overlay renderer composes the
//! visualization artifacts. An optional chat backend (remote
//! vision-language model or a rule-based fallback) refines class lists and
//! phrases conversational answers on top of the authoritative results.
//!
//! # Main APIs
//!
//! - [`pipeline::DetSegPipelineBuilder`] - Configure and build a pipeline
//! - [`pipeline::DetSegPipeline`] - Run detection + segmentation on images
//! - [`core::ModelProvider`] - Explicitly constructed, reusable model owner
//!
//! # Example
//!
//! ```no_run
//! use detseg::pipeline::DetSegPipelineBuilder;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = DetSegPipelineBuilder::new(
//!     "models/owlvit.onnx",
//!     "models/tokenizer.json",
//!     "models/sam_encoder.onnx",
//!     "models/sam_decoder.onnx",
//! )
//! .confidence_threshold(0.25)
//! .build()?;
//!
//! let classes = vec!["car".to_string(), "dog".to_string()];
//! let result = pipeline.run(
//!     Path::new("photo.jpg"),
//!     &classes,
//!     Path::new("outputs"),
//! )?;
//!
//! for det in &result.detections {
//!     println!("{} ({:.2})", det.label, det.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod core;
pub mod models;
pub mod pipeline;
pub mod processors;
pub mod utils;

pub use crate::core::errors::{DetSegError, DetSegResult, PipelineStage};
pub use crate::pipeline::{DetSegPipeline, DetSegPipelineBuilder, PipelineResult};
