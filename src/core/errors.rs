//! Core error types for the detect + segment pipeline.
//!
//! This module defines the error taxonomy used throughout the system:
//! configuration errors, input validation errors, model availability and
//! inference errors, timeouts, and IO failures. Pipeline failures are
//! additionally tagged with the [`PipelineStage`] they occurred in.

use thiserror::Error;

/// Enum representing the sequential stages of a pipeline run.
///
/// A failure anywhere in the pipeline aborts the run and reports the stage
/// it happened in, so callers see "segmentation failed" instead of a bare
/// tensor error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Loading and decoding the input image.
    LoadImage,
    /// Zero-shot object detection.
    Detect,
    /// Converting detections into segmenter box prompts.
    AdaptBoxes,
    /// Promptable segmentation.
    Segment,
    /// Overlay rendering.
    Render,
    /// Writing artifacts and the result record.
    Persist,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::LoadImage => write!(f, "load image"),
            PipelineStage::Detect => write!(f, "detect"),
            PipelineStage::AdaptBoxes => write!(f, "adapt boxes"),
            PipelineStage::Segment => write!(f, "segment"),
            PipelineStage::Render => write!(f, "render"),
            PipelineStage::Persist => write!(f, "persist"),
        }
    }
}

/// Enum representing the errors that can occur in the pipeline.
///
/// Validation errors are raised before any model is invoked (fail fast).
/// `ModelUnavailable` is distinct from an empty detection result so callers
/// can surface a clear service error instead of misinterpreting
/// "no detections".
#[derive(Error, Debug)]
pub enum DetSegError {
    /// Error indicating a configuration problem (missing checkpoint,
    /// invalid settings, absent credentials).
    #[error("configuration: {message}")]
    Config {
        /// A message describing the configuration error.
        message: String,
    },

    /// Error indicating invalid caller input, rejected before any model
    /// call.
    #[error("validation: {message}")]
    Validation {
        /// A message describing the invalid input.
        message: String,
    },

    /// A model backend failed to load or is not reachable.
    #[error("model '{model_name}' unavailable: {context}")]
    ModelUnavailable {
        /// The name of the model that is unavailable.
        model_name: String,
        /// Additional context about the failure.
        context: String,
        /// The underlying error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A specific inference call failed at runtime.
    #[error("inference failed in model '{model_name}': {context}")]
    Inference {
        /// The name of the model where inference failed.
        model_name: String,
        /// Additional context about the inference error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A bounded external call exceeded its deadline.
    #[error("'{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// A pipeline run aborted in the given stage.
    #[error("pipeline stage '{stage}' failed")]
    Stage {
        /// The stage the run aborted in.
        stage: PipelineStage,
        /// The underlying error.
        #[source]
        source: Box<DetSegError>,
    },

    /// Error occurred while loading or decoding an image.
    #[error("image load")]
    ImageLoad(#[source] image::ImageError),

    /// Error from the ONNX Runtime session.
    #[error(transparent)]
    Session(#[from] ort::Error),

    /// Error from tensor shape operations.
    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),

    /// Error serializing or deserializing JSON.
    #[error("json")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias used throughout the crate.
pub type DetSegResult<T> = Result<T, DetSegError>;

impl From<image::ImageError> for DetSegError {
    fn from(error: image::ImageError) -> Self {
        Self::ImageLoad(error)
    }
}

impl From<crate::core::config::ConfigError> for DetSegError {
    fn from(error: crate::core::config::ConfigError) -> Self {
        Self::Config {
            message: error.to_string(),
        }
    }
}

impl DetSegError {
    /// Creates a configuration error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a validation error from a message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a model-unavailable error without an underlying source.
    pub fn model_unavailable(model_name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            model_name: model_name.into(),
            context: context.into(),
            source: None,
        }
    }

    /// Creates a model-unavailable error wrapping the underlying failure.
    pub fn model_unavailable_with_source(
        model_name: impl Into<String>,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ModelUnavailable {
            model_name: model_name.into(),
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wraps an error that occurred during a specific inference call.
    pub fn inference(
        model_name: impl Into<String>,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.into(),
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Tags an error with the pipeline stage it occurred in.
    ///
    /// Validation errors are not re-tagged: they are raised before the
    /// stage machine starts and keep their identity for callers that map
    /// them to client errors.
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            err @ DetSegError::Validation { .. } => err,
            err => DetSegError::Stage {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// Returns the stage this error is tagged with, if any.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            DetSegError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(PipelineStage::LoadImage.to_string(), "load image");
        assert_eq!(PipelineStage::AdaptBoxes.to_string(), "adapt boxes");
        assert_eq!(PipelineStage::Persist.to_string(), "persist");
    }

    #[test]
    fn test_at_stage_wraps_error() {
        let err = DetSegError::config("missing checkpoint").at_stage(PipelineStage::Detect);
        assert_eq!(err.stage(), Some(PipelineStage::Detect));
        assert!(err.to_string().contains("detect"));
    }

    #[test]
    fn test_at_stage_keeps_validation_untagged() {
        let err = DetSegError::validation("empty class list").at_stage(PipelineStage::Detect);
        assert!(matches!(err, DetSegError::Validation { .. }));
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_model_unavailable_display() {
        let err = DetSegError::model_unavailable("owlvit", "model file not found");
        assert_eq!(
            err.to_string(),
            "model 'owlvit' unavailable: model file not found"
        );
    }
}
