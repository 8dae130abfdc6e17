//! Utility functions: image IO, logging setup and overlay rendering.

pub mod visualization;

use crate::core::errors::{DetSegError, DetSegResult};
use image::RgbImage;
use std::path::Path;

pub use visualization::{color_for_label, render_overlay, OverlayStyle};

/// Loads an image from disk as RGB.
pub fn load_image(path: &Path) -> DetSegResult<RgbImage> {
    if !path.exists() {
        return Err(DetSegError::validation(format!(
            "image not found: {}",
            path.display()
        )));
    }
    let img = image::open(path)?;
    Ok(img.to_rgb8())
}

/// Decodes an image from in-memory bytes as RGB.
pub fn load_image_from_bytes(bytes: &[u8]) -> DetSegResult<RgbImage> {
    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Initializes the global tracing subscriber.
///
/// The filter defaults to `info` and can be overridden through
/// `RUST_LOG`. Safe to call once per process, from the binary entrypoint.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
