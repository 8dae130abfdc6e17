//! CLI mode for one-shot pipeline runs.

use crate::config::PipelineConfig;
use detseg::core::errors::{DetSegError, DetSegResult};
use detseg::pipeline::{DetSegPipelineBuilder, PipelineResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// On-disk classes file: `{"classes": ["car", "dog", ...]}`.
#[derive(Debug, Deserialize)]
struct ClassesFile {
    classes: Vec<String>,
}

/// Runs the pipeline once and prints a summary.
pub fn process_run(
    image: &Path,
    classes_json: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> DetSegResult<()> {
    let start = Instant::now();

    // Classes are validated before any model is loaded, so a malformed
    // file fails in milliseconds instead of after model initialization.
    let classes = load_classes(classes_json)?;
    info!(classes = ?classes, "Loaded class list");

    info!("Initializing pipeline...");
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
    let init_time = start.elapsed();
    info!(
        "Pipeline initialized in {:.2}ms",
        init_time.as_secs_f64() * 1000.0
    );

    let run_start = Instant::now();
    let result = pipeline.run(image, &classes, output_dir)?;
    let run_time = run_start.elapsed();
    info!("Run completed in {:.2}ms", run_time.as_secs_f64() * 1000.0);

    print_summary(&result, run_time.as_secs_f64() * 1000.0);
    Ok(())
}

/// Loads and validates the classes file.
fn load_classes(path: &Path) -> DetSegResult<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        DetSegError::validation(format!(
            "cannot read classes file '{}': {e}",
            path.display()
        ))
    })?;
    let file: ClassesFile = serde_json::from_str(&contents).map_err(|e| {
        DetSegError::validation(format!(
            "classes file '{}' is not valid JSON with a 'classes' list: {e}",
            path.display()
        ))
    })?;
    if file.classes.is_empty() {
        return Err(DetSegError::validation(
            "classes file must include a non-empty 'classes' list",
        ));
    }
    Ok(file.classes)
}

/// Prints a short run summary to standard output.
fn print_summary(result: &PipelineResult, processing_time_ms: f64) {
    println!("\n=== Detect + Segment Results ===");
    println!("Image: {}", result.input.image_path);
    println!("Classes: {}", result.input.classes.join(", "));
    println!("Processing time: {:.2}ms", processing_time_ms);
    println!("Detections: {}", result.detections.len());
    println!();

    if result.detections.is_empty() {
        println!("No objects detected.");
    } else {
        for (index, det) in result.detections.iter().enumerate() {
            println!(
                "[{}] {} ({:.1}%) at [{:.0}, {:.0}] - [{:.0}, {:.0}]",
                index + 1,
                det.label,
                det.score * 100.0,
                det.bbox.x_min,
                det.bbox.y_min,
                det.bbox.x_max,
                det.bbox.y_max
            );
        }
    }

    println!();
    println!("Boxes visualization: {}", result.boxes_visualization);
    if let Some(overlay) = &result.overlay {
        println!("Overlay: {}", overlay);
    }
    for seg in &result.segmentations {
        println!("Mask overlay: {}", seg.mask_overlay_path);
    }
}
