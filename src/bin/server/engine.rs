//! Processing engine shared between CLI and server modes.
//!
//! The engine owns the pipeline (and through it the loaded models) plus
//! the selected chat backend, is built once at startup, and is reused for
//! every request. Each request's artifacts go into a fresh UUID-named
//! subdirectory, so concurrent uploads never collide on output paths.

use crate::config::PipelineConfig;
use base64::Engine as _;
use detseg::chat::{select_backend, ChatBackend, ChatConfig, ChatMessage, RuleBasedChat};
use detseg::core::errors::{DetSegError, DetSegResult};
use detseg::pipeline::{DetSegPipeline, DetSegPipelineBuilder, PipelineResult};
use detseg::utils::load_image_from_bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Request to segment an uploaded image.
#[derive(Debug, Deserialize)]
pub struct SegmentImageRequest {
    /// Base64-encoded image bytes (PNG or JPEG).
    pub image: String,
    /// Conversation history, most recent last.
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    /// Proposed object classes.
    pub classes: Vec<String>,
}

/// Response from the segment endpoint.
#[derive(Debug, Serialize)]
pub struct SegmentImageResponse {
    /// Conversational answer (remote VLM, or the rule-based fallback).
    pub chat_answer: String,
    /// The authoritative pipeline result record.
    pub detect_segment: PipelineResult,
    /// Classes as proposed by the caller.
    pub proposed_classes: Vec<String>,
    /// Classes actually used after chat refinement.
    pub refined_classes: Vec<String>,
}

/// Error payload returned by the HTTP API.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Engine wrapping the pipeline and chat backend for shared access.
pub struct DetSegEngine {
    pipeline: DetSegPipeline,
    chat: Arc<dyn ChatBackend>,
}

/// Thread-safe engine handle.
pub type SharedEngine = Arc<DetSegEngine>;

impl DetSegEngine {
    /// Builds the engine: loads both model backends and selects the chat
    /// implementation from configuration.
    pub fn new(config: &PipelineConfig, chat_config: &ChatConfig) -> DetSegResult<Self> {
        let mut builder = DetSegPipelineBuilder::new(
            &config.detector_model,
            &config.tokenizer,
            &config.sam_encoder,
            &config.sam_decoder,
        )
        .confidence_threshold(config.confidence_threshold)
        .mask_threshold(config.mask_threshold);
        if let Some(font) = &config.font {
            builder = builder.font(font);
        }
        let pipeline = builder.build()?;
        let chat = select_backend(chat_config)?;
        Ok(Self { pipeline, chat })
    }

    /// Processes a segment request end-to-end.
    ///
    /// Classes are refined through the chat backend before detection;
    /// refinement and answer failures degrade to the proposed classes and
    /// the rule-based answer, since the conversational layer is soft.
    pub async fn process(
        &self,
        request: SegmentImageRequest,
        run_dir: &Path,
    ) -> DetSegResult<SegmentImageResponse> {
        if request.classes.is_empty() {
            return Err(DetSegError::validation("classes list required"));
        }

        let image_b64 = strip_data_url(&request.image);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(image_b64)
            .map_err(|e| DetSegError::validation(format!("invalid base64 image: {e}")))?;
        let image = load_image_from_bytes(&bytes)
            .map_err(|_| DetSegError::validation("image bytes are not a decodable image"))?;

        // Persist the upload next to the run's artifacts so it can be
        // fetched back through GET /image.
        std::fs::create_dir_all(run_dir)?;
        let upload_path = run_dir.join("input.png");
        image
            .save(&upload_path)
            .map_err(|e| DetSegError::Io(std::io::Error::other(e)))?;

        let refined_classes = match self
            .chat
            .refine_classes(&request.chat_history, &request.classes, Some(image_b64))
            .await
        {
            Ok(refined) if !refined.is_empty() => refined,
            Ok(_) => request.classes.clone(),
            Err(err) => {
                warn!(error = %err, "class refinement failed, using proposed classes");
                request.classes.clone()
            }
        };

        let result = self.pipeline.run_image(
            &image,
            &upload_path.display().to_string(),
            &refined_classes,
            run_dir,
        )?;

        let chat_answer = match self
            .chat
            .answer(&request.chat_history, &refined_classes, &result)
            .await
        {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "chat answer failed, using rule-based fallback");
                RuleBasedChat
                    .answer(&request.chat_history, &refined_classes, &result)
                    .await?
            }
        };

        Ok(SegmentImageResponse {
            chat_answer,
            detect_segment: result,
            proposed_classes: request.classes,
            refined_classes,
        })
    }
}

/// Strips an optional `data:image/..;base64,` prefix.
fn strip_data_url(image: &str) -> &str {
    match image.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => image,
    }
}
