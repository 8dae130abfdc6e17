//! Traits defining the seams between the pipeline and its model backends.
//!
//! The pipeline orchestrates whatever implements these traits; production
//! code plugs in the ONNX wrappers from [`crate::models`], tests plug in
//! stubs. Inference takes `&mut self` because a loaded session is a
//! mutably-stateful resource; the [`ModelProvider`](super::ModelProvider)
//! serializes access.

use crate::core::errors::DetSegResult;
use crate::pipeline::result::Detection;
use crate::processors::{BoxPrompt, Mask};
use image::RgbImage;

/// A zero-shot, open-vocabulary object detector.
pub trait ObjectDetector: Send {
    /// Detects objects matching the free-text `classes` in `image`.
    ///
    /// Returns candidates with score at or above the detector's configured
    /// confidence threshold. The detector may return zero, one or many
    /// boxes per class. An unavailable backend must surface
    /// [`DetSegError::ModelUnavailable`](crate::core::errors::DetSegError::ModelUnavailable),
    /// never an empty list.
    fn detect(&mut self, image: &RgbImage, classes: &[String]) -> DetSegResult<Vec<Detection>>;

    /// Human-readable backend name used in logs and error reports.
    fn name(&self) -> &str;
}

/// A promptable segmentation model driven by box prompts.
pub trait BoxSegmenter: Send {
    /// Segments one region per prompt.
    ///
    /// The output has exactly one entry per input prompt, in the same
    /// order. A prompt for which the model produced no mask is reported as
    /// `None` rather than silently dropped, so the caller can re-align the
    /// paired detections.
    fn segment(
        &mut self,
        image: &RgbImage,
        prompts: &[BoxPrompt],
    ) -> DetSegResult<Vec<Option<Mask>>>;

    /// Human-readable backend name used in logs and error reports.
    fn name(&self) -> &str;
}
