//! Configuration types for the server and CLI.

use detseg::chat::ChatConfig;
use std::path::PathBuf;

/// Configuration for the detect + segment pipeline.
#[derive(Clone)]
pub struct PipelineConfig {
    pub detector_model: PathBuf,
    pub tokenizer: PathBuf,
    pub sam_encoder: PathBuf,
    pub sam_decoder: PathBuf,
    pub confidence_threshold: f32,
    pub mask_threshold: f32,
    pub font: Option<PathBuf>,
}

/// Configuration for the HTTP server.
#[derive(Clone)]
pub struct ServerConfig {
    pub pipeline: PipelineConfig,
    pub chat: ChatConfig,
    pub host: String,
    pub port: u16,
    /// Directory listed by `GET /images_list` and served by `GET /image`.
    pub assets_dir: PathBuf,
    /// Directory receiving per-request artifact subdirectories.
    pub outputs_dir: PathBuf,
}
