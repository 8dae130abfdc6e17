//! Configuration types shared across the pipeline.
//!
//! Model-specific settings (input sizes, thresholds) live next to the
//! model wrappers; this module holds the ONNX Runtime session options
//! applied to every session and the validation error type raised before
//! any model is constructed.

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while validating configuration, before any model call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required file does not exist.
    #[error("required file not found: {path}")]
    MissingFile {
        /// The path that was checked.
        path: String,
    },
    /// A field holds a value outside its valid range.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Checks that a configured model file exists.
pub fn require_file(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConfigError::MissingFile {
            path: path.display().to_string(),
        })
    }
}

/// Validates that a threshold lies in `[0, 1]`.
pub fn require_unit_range(field: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("expected a value in [0, 1], got {value}"),
        })
    }
}

/// ONNX Runtime session configuration applied to every model session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrtSessionConfig {
    /// Number of threads used within an operator.
    pub intra_threads: Option<usize>,
    /// Number of threads used across operators.
    pub inter_threads: Option<usize>,
    /// Graph optimization level (0 = disable, 1..=3 increasing effort).
    pub optimization_level: Option<u8>,
}

impl OrtSessionConfig {
    /// Creates a configuration with all options left at ONNX Runtime
    /// defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the intra-op thread count.
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = Some(threads);
        self
    }

    /// Sets the inter-op thread count.
    pub fn with_inter_threads(mut self, threads: usize) -> Self {
        self.inter_threads = Some(threads);
        self
    }

    /// Sets the graph optimization level (clamped to 0..=3).
    pub fn with_optimization_level(mut self, level: u8) -> Self {
        self.optimization_level = Some(level.min(3));
        self
    }

    /// Applies this configuration to an ONNX Runtime session builder.
    pub fn apply(&self, mut builder: SessionBuilder) -> Result<SessionBuilder, ort::Error> {
        if let Some(intra) = self.intra_threads {
            builder = builder.with_intra_threads(intra)?;
        }
        if let Some(inter) = self.inter_threads {
            builder = builder.with_inter_threads(inter)?;
        }
        if let Some(level) = self.optimization_level {
            let mapped = match level {
                0 => GraphOptimizationLevel::Disable,
                1 => GraphOptimizationLevel::Level1,
                2 => GraphOptimizationLevel::Level2,
                _ => GraphOptimizationLevel::Level3,
            };
            builder = builder.with_optimization_level(mapped)?;
        }
        Ok(builder)
    }
}
