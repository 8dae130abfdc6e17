//! Explicitly constructed model provider.
//!
//! The provider owns the loaded detector and segmenter for the lifetime of
//! the process: built once, injected into every pipeline run, dropped on
//! shutdown. Each session sits behind a `Mutex` and an inference call
//! holds the lock for its duration, so concurrent requests serialize on
//! the shared model instead of racing a mutably-stateful session.

use crate::core::errors::DetSegResult;
use crate::core::traits::{BoxSegmenter, ObjectDetector};
use crate::pipeline::result::Detection;
use crate::processors::{BoxPrompt, Mask};
use image::RgbImage;
use std::sync::Mutex;

/// Owner of the loaded model backends.
pub struct ModelProvider {
    detector: Mutex<Box<dyn ObjectDetector>>,
    segmenter: Mutex<Box<dyn BoxSegmenter>>,
}

impl ModelProvider {
    /// Creates a provider from already-constructed backends.
    pub fn new(detector: Box<dyn ObjectDetector>, segmenter: Box<dyn BoxSegmenter>) -> Self {
        Self {
            detector: Mutex::new(detector),
            segmenter: Mutex::new(segmenter),
        }
    }

    /// Runs detection, holding the detector lock for the call.
    pub fn detect(&self, image: &RgbImage, classes: &[String]) -> DetSegResult<Vec<Detection>> {
        let mut detector = self
            .detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        detector.detect(image, classes)
    }

    /// Runs segmentation, holding the segmenter lock for the call.
    pub fn segment(
        &self,
        image: &RgbImage,
        prompts: &[BoxPrompt],
    ) -> DetSegResult<Vec<Option<Mask>>> {
        let mut segmenter = self
            .segmenter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        segmenter.segment(image, prompts)
    }
}

impl std::fmt::Debug for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelProvider").finish_non_exhaustive()
    }
}
