//! Detect + Segment Server and CLI
//!
//! A cross-platform binary for running the detect + segment pipeline via
//! CLI or HTTP server.
//!
//! # Usage
//!
//! ## CLI Mode
//! ```bash
//! detseg-server run photo.jpg classes.json outputs \
//!     --detector-model models/owlvit.onnx --tokenizer models/tokenizer.json \
//!     --sam-encoder models/sam_encoder.onnx --sam-decoder models/sam_decoder.onnx
//! ```
//!
//! ## Server Mode
//! ```bash
//! detseg-server serve --detector-model models/owlvit.onnx \
//!     --tokenizer models/tokenizer.json --sam-encoder models/sam_encoder.onnx \
//!     --sam-decoder models/sam_decoder.onnx --port 8080
//! ```

mod cli;
mod config;
mod engine;
mod server;

use clap::{Args, Parser, Subcommand};
use detseg::chat::ChatConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "detseg-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Detect + segment pipeline via CLI or HTTP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Model artifacts and thresholds shared by both modes.
#[derive(Args, Clone)]
struct ModelArgs {
    /// Path to the zero-shot detector ONNX export
    #[arg(long = "detector-model", env = "DETSEG_DETECTOR_MODEL")]
    detector_model: PathBuf,

    /// Path to the detector's tokenizer.json
    #[arg(long, env = "DETSEG_TOKENIZER")]
    tokenizer: PathBuf,

    /// Path to the SAM image encoder ONNX export
    #[arg(long = "sam-encoder", env = "DETSEG_SAM_ENCODER")]
    sam_encoder: PathBuf,

    /// Path to the SAM mask decoder ONNX export
    #[arg(long = "sam-decoder", env = "DETSEG_SAM_DECODER")]
    sam_decoder: PathBuf,

    /// Minimum detector score for a candidate to be retained
    #[arg(long = "confidence-threshold", default_value_t = 0.25)]
    confidence_threshold: f32,

    /// Probability cutoff for binarizing segmenter output
    #[arg(long = "mask-threshold", default_value_t = 0.5)]
    mask_threshold: f32,

    /// TTF/OTF font used for overlay labels (labels are skipped without it)
    #[arg(long, env = "DETSEG_FONT")]
    font: Option<PathBuf>,
}

impl ModelArgs {
    fn into_pipeline_config(self) -> config::PipelineConfig {
        config::PipelineConfig {
            detector_model: self.detector_model,
            tokenizer: self.tokenizer,
            sam_encoder: self.sam_encoder,
            sam_decoder: self.sam_decoder,
            confidence_threshold: self.confidence_threshold,
            mask_threshold: self.mask_threshold,
            font: self.font,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Process a single image via CLI
    Run {
        /// Path to the input image
        image: PathBuf,

        /// Path to a JSON file with a non-empty 'classes' list
        classes_json: PathBuf,

        /// Directory to write artifacts and results.json into
        output_dir: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },
    /// Start the HTTP server
    Serve {
        #[command(flatten)]
        model: ModelArgs,

        /// Port to listen on
        #[arg(long, short, default_value = "8080", env = "DETSEG_PORT")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0", env = "DETSEG_HOST")]
        host: String,

        /// Directory of images listed by /images_list
        #[arg(long = "assets-dir", default_value = "images", env = "DETSEG_ASSETS_DIR")]
        assets_dir: PathBuf,

        /// Directory receiving per-request artifact subdirectories
        #[arg(long = "outputs-dir", default_value = "outputs", env = "DETSEG_OUTPUTS_DIR")]
        outputs_dir: PathBuf,

        /// OpenAI-compatible chat endpoint; without it the rule-based
        /// fallback answers
        #[arg(long = "chat-endpoint", env = "DETSEG_CHAT_ENDPOINT")]
        chat_endpoint: Option<String>,

        /// Model name sent to the chat endpoint
        #[arg(long = "chat-model", default_value = "qwen2-vl", env = "DETSEG_CHAT_MODEL")]
        chat_model: String,

        /// Deadline for a single chat call, in seconds
        #[arg(long = "chat-timeout", default_value_t = 30, env = "DETSEG_CHAT_TIMEOUT")]
        chat_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    detseg::utils::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            image,
            classes_json,
            output_dir,
            model,
        } => {
            info!("Processing file: {}", image.display());
            cli::process_run(
                &image,
                &classes_json,
                &output_dir,
                &model.into_pipeline_config(),
            )?;
        }
        Commands::Serve {
            model,
            port,
            host,
            assets_dir,
            outputs_dir,
            chat_endpoint,
            chat_model,
            chat_timeout,
        } => {
            let config = config::ServerConfig {
                pipeline: model.into_pipeline_config(),
                chat: ChatConfig {
                    endpoint: chat_endpoint,
                    model: chat_model,
                    timeout_secs: chat_timeout,
                },
                host,
                port,
                assets_dir,
                outputs_dir,
            };

            info!("Starting server on {}:{}", config.host, config.port);
            server::run_server(config).await?;
        }
    }

    Ok(())
}
