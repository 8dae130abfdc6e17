//! OWL-ViT zero-shot object detection model.
//!
//! Wraps an ONNX export of an OWL-ViT-style open-vocabulary detector: the
//! image and the tokenized free-text class names go in, per-query class
//! logits and normalized boxes come out. This module handles
//! preprocessing, inference and decoding; the free-text class list makes
//! the detector open-vocabulary, so there is no fixed label set.

use crate::core::config::OrtSessionConfig;
use crate::core::errors::{DetSegError, DetSegResult};
use crate::core::traits::ObjectDetector;
use crate::pipeline::result::Detection;
use crate::processors::BoundingBox;
use image::RgbImage;
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// CLIP image normalization mean (RGB).
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
/// CLIP image normalization std (RGB).
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Expected ONNX graph tensor names for OWL-ViT exports.
const INPUT_IDS: &str = "input_ids";
const ATTENTION_MASK: &str = "attention_mask";
const PIXEL_VALUES: &str = "pixel_values";
const OUTPUT_LOGITS: &str = "logits";
const OUTPUT_BOXES: &str = "pred_boxes";

/// Configuration for the OWL-ViT detector.
#[derive(Debug, Clone)]
pub struct OwlVitConfig {
    /// Square input resolution the export was traced with.
    pub input_size: u32,
    /// Minimum score for a candidate to be retained.
    pub confidence_threshold: f32,
}

impl Default for OwlVitConfig {
    fn default() -> Self {
        Self {
            input_size: 768,
            confidence_threshold: 0.25,
        }
    }
}

/// OWL-ViT detector backed by an ONNX Runtime session.
#[derive(Debug)]
pub struct OwlVitDetector {
    session: Session,
    tokenizer: tokenizers::Tokenizer,
    config: OwlVitConfig,
    model_name: String,
}

impl OwlVitDetector {
    /// Loads the detector from an ONNX export and its tokenizer file.
    ///
    /// A missing model or tokenizer file, or a session build failure,
    /// surfaces as `ModelUnavailable` so callers can distinguish a broken
    /// backend from "no detections".
    pub fn new(
        model_path: &Path,
        tokenizer_path: &Path,
        config: OwlVitConfig,
        ort_config: Option<&OrtSessionConfig>,
    ) -> DetSegResult<Self> {
        let model_name = "owlvit".to_string();

        if !model_path.exists() {
            return Err(DetSegError::model_unavailable(
                &model_name,
                format!("model file not found: {}", model_path.display()),
            ));
        }
        if !tokenizer_path.exists() {
            return Err(DetSegError::model_unavailable(
                &model_name,
                format!("tokenizer file not found: {}", tokenizer_path.display()),
            ));
        }

        let mut builder = Session::builder().map_err(|e| {
            DetSegError::model_unavailable_with_source(&model_name, "session builder", e)
        })?;
        if let Some(ort_config) = ort_config {
            builder = ort_config.apply(builder).map_err(|e| {
                DetSegError::model_unavailable_with_source(&model_name, "session options", e)
            })?;
        }
        let session = builder.commit_from_file(model_path).map_err(|e| {
            DetSegError::model_unavailable_with_source(
                &model_name,
                format!("failed to load '{}'", model_path.display()),
                e,
            )
        })?;

        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path).map_err(|e| {
            DetSegError::model_unavailable(
                &model_name,
                format!(
                    "failed to load tokenizer '{}': {e}",
                    tokenizer_path.display()
                ),
            )
        })?;

        Ok(Self {
            session,
            tokenizer,
            config,
            model_name,
        })
    }

    /// Tokenizes the class names into padded id/mask arrays.
    fn encode_classes(&self, classes: &[String]) -> DetSegResult<(Array2<i64>, Array2<i64>)> {
        let mut encodings = Vec::with_capacity(classes.len());
        for class in classes {
            let encoding = self
                .tokenizer
                .encode(class.as_str(), true)
                .map_err(|e| {
                    DetSegError::inference(
                        &self.model_name,
                        format!("failed to tokenize class '{class}'"),
                        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
                    )
                })?;
            encodings.push(encoding.get_ids().to_vec());
        }

        let max_len = encodings.iter().map(Vec::len).max().unwrap_or(1).max(1);
        let mut input_ids = Array2::<i64>::zeros((classes.len(), max_len));
        let mut attention_mask = Array2::<i64>::zeros((classes.len(), max_len));
        for (row, ids) in encodings.iter().enumerate() {
            for (col, &id) in ids.iter().enumerate() {
                input_ids[[row, col]] = id as i64;
                attention_mask[[row, col]] = 1;
            }
        }
        Ok((input_ids, attention_mask))
    }

    /// Resizes and normalizes the image into a CHW tensor.
    fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(
            image,
            size,
            size,
            image::imageops::FilterType::Triangle,
        );

        let mut pixel_values = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                pixel_values[[0, channel, y as usize, x as usize]] =
                    (value - CLIP_MEAN[channel]) / CLIP_STD[channel];
            }
        }
        pixel_values
    }
}

impl ObjectDetector for OwlVitDetector {
    fn detect(&mut self, image: &RgbImage, classes: &[String]) -> DetSegResult<Vec<Detection>> {
        if classes.is_empty() {
            return Err(DetSegError::validation(
                "detector queried with an empty class list",
            ));
        }

        let (input_ids, attention_mask) = self.encode_classes(classes)?;
        let pixel_values = self.preprocess(image);

        let ids_tensor = TensorRef::from_array_view(&input_ids)?;
        let mask_tensor = TensorRef::from_array_view(&attention_mask)?;
        let pixels_tensor = TensorRef::from_array_view(&pixel_values)?;

        let outputs = self
            .session
            .run(ort::inputs![
                INPUT_IDS => ids_tensor,
                ATTENTION_MASK => mask_tensor,
                PIXEL_VALUES => pixels_tensor
            ])
            .map_err(|e| DetSegError::inference(&self.model_name, "forward pass", e))?;

        let (logits_shape, logits) = outputs[OUTPUT_LOGITS].try_extract_tensor::<f32>()?;
        let (boxes_shape, boxes) = outputs[OUTPUT_BOXES].try_extract_tensor::<f32>()?;

        if logits_shape.len() != 3 || boxes_shape.len() != 3 || boxes_shape[2] != 4 {
            return Err(DetSegError::inference(
                &self.model_name,
                format!(
                    "unexpected output shapes: logits {logits_shape:?}, boxes {boxes_shape:?}"
                ),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            ));
        }

        let num_queries = logits_shape[1] as usize;
        let num_classes = logits_shape[2] as usize;
        if num_classes != classes.len() {
            return Err(DetSegError::inference(
                &self.model_name,
                format!(
                    "logits report {num_classes} classes but {} were queried",
                    classes.len()
                ),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            ));
        }

        Ok(decode_detections(
            logits,
            boxes,
            num_queries,
            classes,
            self.config.confidence_threshold,
            image.width(),
            image.height(),
        ))
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Decodes raw OWL-ViT outputs into threshold-filtered detections.
///
/// `logits` is `[queries * classes]` row-major, `boxes` is `[queries * 4]`
/// center-format (`cx, cy, w, h`) normalized to `[0, 1]`. Each query keeps
/// its best class; a candidate survives when its sigmoid score reaches the
/// threshold and its box has positive area after scaling and clipping.
fn decode_detections(
    logits: &[f32],
    boxes: &[f32],
    num_queries: usize,
    classes: &[String],
    confidence_threshold: f32,
    image_width: u32,
    image_height: u32,
) -> Vec<Detection> {
    let num_classes = classes.len();
    let width = image_width as f32;
    let height = image_height as f32;
    let mut detections = Vec::new();

    for query in 0..num_queries {
        let row = &logits[query * num_classes..(query + 1) * num_classes];
        let Some((best_class, &best_logit)) = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        else {
            continue;
        };

        let score = sigmoid(best_logit);
        if score < confidence_threshold {
            continue;
        }

        let cx = boxes[query * 4] * width;
        let cy = boxes[query * 4 + 1] * height;
        let bw = boxes[query * 4 + 2] * width;
        let bh = boxes[query * 4 + 3] * height;

        let bbox = BoundingBox::new(
            (cx - bw / 2.0).clamp(0.0, width),
            (cy - bh / 2.0).clamp(0.0, height),
            (cx + bw / 2.0).clamp(0.0, width),
            (cy + bh / 2.0).clamp(0.0, height),
        );
        if bbox.is_empty() {
            continue;
        }

        detections.push(Detection::new(classes[best_class].clone(), score, bbox));
    }

    detections
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_fails_with_missing_model() {
        let err = OwlVitDetector::new(
            Path::new("nonexistent.onnx"),
            Path::new("nonexistent.json"),
            OwlVitConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DetSegError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_decode_filters_by_threshold() {
        // Two queries, one class. Query 0 has logit 3.0 (score ≈ 0.95),
        // query 1 has logit -3.0 (score ≈ 0.05).
        let logits = [3.0, -3.0];
        let boxes = [
            0.5, 0.5, 0.4, 0.4, // query 0: centered box
            0.2, 0.2, 0.1, 0.1, // query 1
        ];
        let detections =
            decode_detections(&logits, &boxes, 2, &classes(&["car"]), 0.5, 100, 100);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "car");
        assert!(detections[0].score > 0.9);
    }

    #[test]
    fn test_decode_scales_boxes_to_pixels() {
        let logits = [4.0];
        let boxes = [0.5, 0.5, 0.5, 0.5];
        let detections =
            decode_detections(&logits, &boxes, 1, &classes(&["dog"]), 0.25, 200, 100);
        let bbox = detections[0].bbox;
        assert_eq!(bbox.x_min, 50.0);
        assert_eq!(bbox.y_min, 25.0);
        assert_eq!(bbox.x_max, 150.0);
        assert_eq!(bbox.y_max, 75.0);
    }

    #[test]
    fn test_decode_picks_best_class_per_query() {
        let logits = [-1.0, 2.0, 0.0];
        let boxes = [0.5, 0.5, 0.2, 0.2];
        let detections = decode_detections(
            &logits,
            &boxes,
            1,
            &classes(&["car", "dog", "tree"]),
            0.5,
            100,
            100,
        );
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "dog");
    }

    #[test]
    fn test_decode_drops_degenerate_boxes() {
        let logits = [4.0];
        let boxes = [0.0, 0.0, 0.0, 0.0];
        let detections =
            decode_detections(&logits, &boxes, 1, &classes(&["car"]), 0.25, 100, 100);
        assert!(detections.is_empty());
    }
}
