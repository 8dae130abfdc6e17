//! High-level detect + segment pipeline.
//!
//! `DetSegPipelineBuilder` wires the ONNX model wrappers into a
//! [`ModelProvider`]; `DetSegPipeline` runs the sequential stage machine
//! `LoadImage → Detect → (empty ⇒ short-circuit) → AdaptBoxes → Segment →
//! Render → Persist`. Each invocation owns its result record and shares no
//! state with other runs; a failure in any stage aborts the run with an
//! error naming that stage.

use crate::core::config::{require_file, require_unit_range, OrtSessionConfig};
use crate::core::errors::{DetSegError, DetSegResult, PipelineStage};
use crate::core::provider::ModelProvider;
use crate::models::detection::{OwlVitConfig, OwlVitDetector};
use crate::models::segmentation::{SamConfig, SamSegmenter};
use crate::pipeline::result::{
    Detection, PipelineInput, PipelineResult, SegmentationRecord,
};
use crate::processors::{adapt_boxes, Mask};
use crate::utils::visualization::{
    color_for_label, draw_boxes, overlay_mask, render_overlay, OverlayStyle,
};
use crate::utils::load_image;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builder for the detect + segment pipeline.
///
/// # Example
///
/// ```no_run
/// use detseg::pipeline::DetSegPipelineBuilder;
///
/// let pipeline = DetSegPipelineBuilder::new(
///     "models/owlvit.onnx",
///     "models/tokenizer.json",
///     "models/sam_encoder.onnx",
///     "models/sam_decoder.onnx",
/// )
/// .confidence_threshold(0.3)
/// .mask_threshold(0.5)
/// .build()
/// .expect("failed to build pipeline");
/// ```
#[derive(Debug)]
pub struct DetSegPipelineBuilder {
    detector_model: PathBuf,
    tokenizer: PathBuf,
    sam_encoder: PathBuf,
    sam_decoder: PathBuf,
    confidence_threshold: f32,
    mask_threshold: f32,
    font_path: Option<PathBuf>,
    ort_session_config: Option<OrtSessionConfig>,
}

impl DetSegPipelineBuilder {
    /// Creates a builder from the four required model artifacts.
    pub fn new(
        detector_model: impl Into<PathBuf>,
        tokenizer: impl Into<PathBuf>,
        sam_encoder: impl Into<PathBuf>,
        sam_decoder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            detector_model: detector_model.into(),
            tokenizer: tokenizer.into(),
            sam_encoder: sam_encoder.into(),
            sam_decoder: sam_decoder.into(),
            confidence_threshold: 0.25,
            mask_threshold: 0.5,
            font_path: None,
            ort_session_config: None,
        }
    }

    /// Sets the minimum detector score for a candidate to be retained.
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Sets the probability cutoff for binarizing segmenter output.
    pub fn mask_threshold(mut self, threshold: f32) -> Self {
        self.mask_threshold = threshold;
        self
    }

    /// Sets the font used for overlay labels.
    pub fn font(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_path = Some(path.into());
        self
    }

    /// Sets the ONNX Runtime session configuration applied to all models.
    pub fn ort_session(mut self, config: OrtSessionConfig) -> Self {
        self.ort_session_config = Some(config);
        self
    }

    /// Validates the configuration and loads both model backends.
    pub fn build(self) -> DetSegResult<DetSegPipeline> {
        require_unit_range("confidence_threshold", self.confidence_threshold)?;
        require_unit_range("mask_threshold", self.mask_threshold)?;
        require_file(&self.detector_model)?;
        require_file(&self.tokenizer)?;
        require_file(&self.sam_encoder)?;
        require_file(&self.sam_decoder)?;

        let detector = OwlVitDetector::new(
            &self.detector_model,
            &self.tokenizer,
            OwlVitConfig {
                confidence_threshold: self.confidence_threshold,
                ..OwlVitConfig::default()
            },
            self.ort_session_config.as_ref(),
        )?;

        let segmenter = SamSegmenter::new(
            &self.sam_encoder,
            &self.sam_decoder,
            SamConfig {
                mask_threshold: self.mask_threshold,
                ..SamConfig::default()
            },
            self.ort_session_config.as_ref(),
        )?;

        let provider = Arc::new(ModelProvider::new(Box::new(detector), Box::new(segmenter)));
        Ok(DetSegPipeline {
            provider,
            style: OverlayStyle::with_font_path(self.font_path.as_deref()),
        })
    }
}

/// Runtime for executing detect + segment runs.
#[derive(Debug)]
pub struct DetSegPipeline {
    provider: Arc<ModelProvider>,
    style: OverlayStyle,
}

impl DetSegPipeline {
    /// Creates a pipeline around an already-constructed provider.
    ///
    /// This is the injection seam: tests and embedders supply their own
    /// backends without touching ONNX.
    pub fn from_provider(provider: Arc<ModelProvider>) -> Self {
        Self {
            provider,
            style: OverlayStyle::default(),
        }
    }

    /// Replaces the overlay style.
    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    /// Runs the pipeline on an image file.
    ///
    /// Writes `boxes_visualized.png`, `overlay.png`,
    /// `mask_overlay_{i}.png` per surviving detection and `results.json`
    /// into `output_dir`, and returns the result record.
    pub fn run(
        &self,
        image_path: &Path,
        classes: &[String],
        output_dir: &Path,
    ) -> DetSegResult<PipelineResult> {
        validate_classes(classes)?;
        let image =
            load_image(image_path).map_err(|e| e.at_stage(PipelineStage::LoadImage))?;
        self.run_image(
            &image,
            &image_path.display().to_string(),
            classes,
            output_dir,
        )
    }

    /// Runs the pipeline on an already-decoded image.
    ///
    /// `image_name` is echoed into the result record as the input path.
    pub fn run_image(
        &self,
        image: &RgbImage,
        image_name: &str,
        classes: &[String],
        output_dir: &Path,
    ) -> DetSegResult<PipelineResult> {
        validate_classes(classes)?;

        std::fs::create_dir_all(output_dir)
            .map_err(|e| DetSegError::from(e).at_stage(PipelineStage::Persist))?;

        let input = PipelineInput {
            image_path: image_name.to_string(),
            classes: classes.to_vec(),
        };

        // Detect
        let detections = self
            .provider
            .detect(image, classes)
            .map_err(|e| e.at_stage(PipelineStage::Detect))?;
        info!(
            image = image_name,
            detections = detections.len(),
            "detection complete"
        );

        // Short-circuit: nothing to segment, the boxes artifact is the
        // original image unmodified and no mask overlays are written.
        if detections.is_empty() {
            let boxes_path = output_dir.join("boxes_visualized.png");
            save_image(image, &boxes_path)
                .map_err(|e| e.at_stage(PipelineStage::Persist))?;
            let result = PipelineResult {
                input,
                detections: Vec::new(),
                boxes_visualization: boxes_path.display().to_string(),
                segmentations: Vec::new(),
                overlay: None,
            };
            persist_record(&result, output_dir)
                .map_err(|e| e.at_stage(PipelineStage::Persist))?;
            return Ok(result);
        }

        // AdaptBoxes
        let boxes: Vec<_> = detections.iter().map(|det| det.bbox).collect();
        let prompts = adapt_boxes(&boxes, image.width(), image.height());
        debug!(prompts = prompts.len(), "box prompts adapted");

        // Segment
        let masks = self
            .provider
            .segment(image, &prompts)
            .map_err(|e| e.at_stage(PipelineStage::Segment))?;
        if masks.len() != prompts.len() {
            return Err(DetSegError::inference(
                "segmenter",
                format!(
                    "{} masks returned for {} prompts",
                    masks.len(),
                    prompts.len()
                ),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            )
            .at_stage(PipelineStage::Segment));
        }

        // A detection whose segmentation failed is dropped from every
        // collection, keeping detections, masks and records index-aligned.
        let mut surviving: Vec<(Detection, Mask)> = Vec::with_capacity(detections.len());
        let mut dropped = 0usize;
        for (det, mask) in detections.into_iter().zip(masks) {
            match mask {
                Some(mask) => surviving.push((det, mask)),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!(dropped, "detections dropped after segmentation failures");
        }

        let kept_detections: Vec<Detection> =
            surviving.iter().map(|(det, _)| det.clone()).collect();
        let kept_masks: Vec<Mask> = surviving.into_iter().map(|(_, mask)| mask).collect();

        // Render
        let boxes_vis = draw_boxes(image, &kept_detections, &self.style);
        let combined = render_overlay(image, &kept_detections, &kept_masks, &self.style);
        let mask_overlays: Vec<RgbImage> = kept_detections
            .iter()
            .zip(&kept_masks)
            .map(|(det, mask)| {
                overlay_mask(
                    image,
                    mask,
                    color_for_label(&det.label),
                    self.style.mask_alpha,
                )
            })
            .collect();

        // Persist
        let boxes_path = output_dir.join("boxes_visualized.png");
        save_image(&boxes_vis, &boxes_path).map_err(|e| e.at_stage(PipelineStage::Persist))?;
        let overlay_path = output_dir.join("overlay.png");
        save_image(&combined, &overlay_path)
            .map_err(|e| e.at_stage(PipelineStage::Persist))?;

        let mut segmentations = Vec::with_capacity(kept_detections.len());
        for (index, ((det, mask), rendered)) in kept_detections
            .iter()
            .zip(&kept_masks)
            .zip(&mask_overlays)
            .enumerate()
        {
            let mask_path = output_dir.join(format!("mask_overlay_{index}.png"));
            save_image(rendered, &mask_path)
                .map_err(|e| e.at_stage(PipelineStage::Persist))?;
            segmentations.push(SegmentationRecord {
                label: det.label.clone(),
                score: det.score,
                bbox: det.bbox,
                mask_shape: mask.shape(),
                mask_overlay_path: mask_path.display().to_string(),
            });
        }

        let result = PipelineResult {
            input,
            detections: kept_detections,
            boxes_visualization: boxes_path.display().to_string(),
            segmentations,
            overlay: Some(overlay_path.display().to_string()),
        };
        persist_record(&result, output_dir).map_err(|e| e.at_stage(PipelineStage::Persist))?;

        info!(
            image = image_name,
            segmented = result.segmentations.len(),
            "pipeline run complete"
        );
        Ok(result)
    }
}

/// Rejects empty or blank class lists before any model is invoked.
fn validate_classes(classes: &[String]) -> DetSegResult<()> {
    if classes.is_empty() {
        return Err(DetSegError::validation(
            "classes must be a non-empty list of class names",
        ));
    }
    if classes.iter().any(|class| class.trim().is_empty()) {
        return Err(DetSegError::validation(
            "classes must not contain empty names",
        ));
    }
    Ok(())
}

fn save_image(image: &RgbImage, path: &Path) -> DetSegResult<()> {
    image
        .save(path)
        .map_err(|e| DetSegError::Io(std::io::Error::other(e)))
}

fn persist_record(result: &PipelineResult, output_dir: &Path) -> DetSegResult<()> {
    let json = result.to_json()?;
    std::fs::write(output_dir.join("results.json"), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{BoxSegmenter, ObjectDetector};
    use crate::processors::{BoundingBox, BoxPrompt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubDetector {
        detections: Vec<Detection>,
        calls: Arc<AtomicUsize>,
    }

    impl ObjectDetector for StubDetector {
        fn detect(
            &mut self,
            _image: &RgbImage,
            _classes: &[String],
        ) -> DetSegResult<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }

        fn name(&self) -> &str {
            "stub-detector"
        }
    }

    struct StubSegmenter {
        // Prompt indices for which segmentation "fails".
        failing: Vec<usize>,
        calls: Arc<AtomicUsize>,
    }

    impl BoxSegmenter for StubSegmenter {
        fn segment(
            &mut self,
            image: &RgbImage,
            prompts: &[BoxPrompt],
        ) -> DetSegResult<Vec<Option<Mask>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(prompts
                .iter()
                .enumerate()
                .map(|(index, prompt)| {
                    if self.failing.contains(&index) {
                        return None;
                    }
                    let mut data =
                        vec![false; (image.width() * image.height()) as usize];
                    for y in prompt.y_min..prompt.y_max {
                        for x in prompt.x_min..prompt.x_max {
                            data[(y as u32 * image.width() + x as u32) as usize] = true;
                        }
                    }
                    Some(Mask::new(image.width(), image.height(), data).unwrap())
                })
                .collect())
        }

        fn name(&self) -> &str {
            "stub-segmenter"
        }
    }

    struct Harness {
        pipeline: DetSegPipeline,
        detector_calls: Arc<AtomicUsize>,
        segmenter_calls: Arc<AtomicUsize>,
    }

    fn harness(detections: Vec<Detection>, failing: Vec<usize>) -> Harness {
        let detector_calls = Arc::new(AtomicUsize::new(0));
        let segmenter_calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ModelProvider::new(
            Box::new(StubDetector {
                detections,
                calls: detector_calls.clone(),
            }),
            Box::new(StubSegmenter {
                failing,
                calls: segmenter_calls.clone(),
            }),
        ));
        Harness {
            pipeline: DetSegPipeline::from_provider(provider),
            detector_calls,
            segmenter_calls,
        }
    }

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn car_detection() -> Detection {
        Detection::new("car", 0.9, BoundingBox::new(10.0, 10.0, 50.0, 50.0))
    }

    #[test]
    fn test_empty_classes_fails_before_any_model_call() {
        let harness = harness(vec![car_detection()], vec![]);
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::new(100, 100);

        let err = harness
            .pipeline
            .run_image(&image, "img", &[], dir.path())
            .unwrap_err();

        assert!(matches!(err, DetSegError::Validation { .. }));
        assert_eq!(harness.detector_calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.segmenter_calls.load(Ordering::SeqCst), 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_zero_detections_short_circuits() {
        let harness = harness(vec![], vec![]);
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::from_pixel(100, 100, image::Rgb([12, 34, 56]));

        let result = harness
            .pipeline
            .run_image(&image, "img", &classes(&["car"]), dir.path())
            .unwrap();

        assert!(result.detections.is_empty());
        assert!(result.segmentations.is_empty());
        assert_eq!(harness.segmenter_calls.load(Ordering::SeqCst), 0);

        // The boxes visualization equals the original image unmodified.
        let saved = image::open(dir.path().join("boxes_visualized.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(saved.as_raw(), image.as_raw());

        // No mask overlays were written.
        assert!(!dir.path().join("mask_overlay_0.png").exists());
        assert!(dir.path().join("results.json").exists());
    }

    #[test]
    fn test_successful_run_invariants() {
        let detections = vec![
            Detection::new("car", 0.9, BoundingBox::new(10.0, 10.0, 50.0, 50.0)),
            Detection::new("dog", 0.8, BoundingBox::new(60.0, 20.0, 90.0, 70.0)),
            Detection::new("car", 0.7, BoundingBox::new(5.0, 60.0, 30.0, 95.0)),
        ];
        let harness = harness(detections.clone(), vec![]);
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::new(100, 100);

        let result = harness
            .pipeline
            .run_image(&image, "img", &classes(&["car", "dog"]), dir.path())
            .unwrap();

        assert_eq!(result.detections.len(), result.segmentations.len());
        for (det, seg) in result.detections.iter().zip(&result.segmentations) {
            assert_eq!(det.label, seg.label);
            assert_eq!(det.bbox, seg.bbox);
        }
        // Order preserved end-to-end.
        let labels: Vec<_> = result.detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["car", "dog", "car"]);

        for (index, seg) in result.segmentations.iter().enumerate() {
            assert_eq!(seg.mask_shape, [100, 100]);
            assert!(dir
                .path()
                .join(format!("mask_overlay_{index}.png"))
                .exists());
        }
        assert!(dir.path().join("overlay.png").exists());
    }

    #[test]
    fn test_failed_segmentation_dropped_from_all_collections() {
        let detections = vec![
            Detection::new("car", 0.9, BoundingBox::new(10.0, 10.0, 50.0, 50.0)),
            Detection::new("dog", 0.8, BoundingBox::new(60.0, 20.0, 90.0, 70.0)),
        ];
        let harness = harness(detections, vec![1]);
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::new(100, 100);

        let result = harness
            .pipeline
            .run_image(&image, "img", &classes(&["car", "dog"]), dir.path())
            .unwrap();

        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.segmentations.len(), 1);
        assert_eq!(result.detections[0].label, "car");
        assert_eq!(result.segmentations[0].label, "car");
        assert!(dir.path().join("mask_overlay_0.png").exists());
        assert!(!dir.path().join("mask_overlay_1.png").exists());
    }

    #[test]
    fn test_concrete_car_scenario() {
        let harness = harness(vec![car_detection()], vec![]);
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::new(100, 100);

        let result = harness
            .pipeline
            .run_image(&image, "img", &classes(&["car"]), dir.path())
            .unwrap();

        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.segmentations.len(), 1);
        assert_eq!(result.detections[0].label, "car");
        assert_eq!(result.segmentations[0].mask_shape, [100, 100]);

        let overlay = image::open(dir.path().join("overlay.png")).unwrap().to_rgb8();
        assert_eq!(overlay.dimensions(), (100, 100));
        // Box outline corner carries the deterministic label color.
        assert_eq!(overlay.get_pixel(10, 10), &color_for_label("car"));

        let json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("results.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(json["detections"].as_array().unwrap().len(), 1);
        assert_eq!(json["segmentations"].as_array().unwrap().len(), 1);
        assert_eq!(json["segmentations"][0]["label"], "car");
        assert_eq!(json["segmentations"][0]["box"], json["detections"][0]["box"]);
    }

    #[test]
    fn test_detector_failure_reports_detect_stage() {
        struct FailingDetector;
        impl ObjectDetector for FailingDetector {
            fn detect(
                &mut self,
                _image: &RgbImage,
                _classes: &[String],
            ) -> DetSegResult<Vec<Detection>> {
                Err(DetSegError::model_unavailable("owlvit", "gone"))
            }
            fn name(&self) -> &str {
                "failing"
            }
        }

        let provider = Arc::new(ModelProvider::new(
            Box::new(FailingDetector),
            Box::new(StubSegmenter {
                failing: vec![],
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        ));
        let pipeline = DetSegPipeline::from_provider(provider);
        let dir = tempfile::tempdir().unwrap();

        let err = pipeline
            .run_image(&RgbImage::new(10, 10), "img", &classes(&["car"]), dir.path())
            .unwrap_err();
        assert_eq!(err.stage(), Some(PipelineStage::Detect));
    }

    #[test]
    fn test_validate_classes_rejects_blank_names() {
        assert!(validate_classes(&classes(&["car", "  "])).is_err());
        assert!(validate_classes(&classes(&["car"])).is_ok());
    }
}
