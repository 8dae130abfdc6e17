//! Result types for the detect + segment pipeline.
//!
//! [`PipelineResult`] is the persisted, serializable record of one run.
//! Its JSON shape is a stable on-disk contract: the keys `input`,
//! `detections`, `boxes_visualization` and `segmentations` are always
//! present, and `detections`/`segmentations` are ordered sequences that
//! match each other by index.

use crate::processors::BoundingBox;
use serde::{Deserialize, Serialize};

/// A single zero-shot detection: a free-text label, a confidence score and
/// a pixel-coordinate bounding box.
///
/// Detections are immutable once created and keep their detector-assigned
/// order throughout the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// The free-text class name this box was matched against.
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub score: f32,
    /// The bounding box in original-image pixel coordinates.
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    /// Creates a new detection.
    pub fn new(label: impl Into<String>, score: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            score,
            bbox,
        }
    }
}

/// The persisted projection of one detection + mask pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationRecord {
    /// Label copied from the paired detection.
    pub label: String,
    /// Score copied from the paired detection.
    pub score: f32,
    /// Box copied from the paired detection.
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Mask dimensions as `[height, width]`.
    pub mask_shape: [u32; 2],
    /// Path of the rendered per-detection mask overlay.
    pub mask_overlay_path: String,
}

/// Echo of the run's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInput {
    /// Path (or service-assigned name) of the processed image.
    pub image_path: String,
    /// The class names the detector was queried with.
    pub classes: Vec<String>,
}

/// The full output record of one pipeline invocation.
///
/// Owned exclusively by the run that produced it; runs share no state.
/// After a successful run `detections` and `segmentations` have equal
/// length and agree at every index on label and box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Echo of the input.
    pub input: PipelineInput,
    /// Surviving detections, in detector order.
    pub detections: Vec<Detection>,
    /// Path of the boxes-only visualization artifact.
    pub boxes_visualization: String,
    /// Per-detection segmentation records, index-aligned with
    /// `detections`.
    pub segmentations: Vec<SegmentationRecord>,
    /// Path of the combined overlay artifact (masks + boxes + labels), if
    /// one was rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<String>,
}

impl PipelineResult {
    /// Serializes the record as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Returns true when the run found nothing to segment.
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> PipelineResult {
        let bbox = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        PipelineResult {
            input: PipelineInput {
                image_path: "photo.jpg".to_string(),
                classes: vec!["car".to_string()],
            },
            detections: vec![Detection::new("car", 0.9, bbox)],
            boxes_visualization: "out/boxes_visualized.png".to_string(),
            segmentations: vec![SegmentationRecord {
                label: "car".to_string(),
                score: 0.9,
                bbox,
                mask_shape: [100, 100],
                mask_overlay_path: "out/mask_overlay_0.png".to_string(),
            }],
            overlay: None,
        }
    }

    #[test]
    fn test_json_contract_keys() {
        let json: serde_json::Value =
            serde_json::from_str(&sample_result().to_json().unwrap()).unwrap();
        assert!(json.get("input").is_some());
        assert!(json.get("detections").is_some());
        assert!(json.get("boxes_visualization").is_some());
        assert!(json.get("segmentations").is_some());
        assert_eq!(json["input"]["image_path"], "photo.jpg");
        assert_eq!(json["detections"][0]["box"]["xmin"], 10.0);
        assert_eq!(json["segmentations"][0]["mask_shape"][0], 100);
    }

    #[test]
    fn test_detections_segmentations_index_aligned() {
        let result = sample_result();
        assert_eq!(result.detections.len(), result.segmentations.len());
        for (det, seg) in result.detections.iter().zip(&result.segmentations) {
            assert_eq!(det.label, seg.label);
            assert_eq!(det.bbox, seg.bbox);
        }
    }

    #[test]
    fn test_round_trip() {
        let result = sample_result();
        let parsed: PipelineResult =
            serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_overlay_key_absent_when_none() {
        let json = sample_result().to_json().unwrap();
        assert!(!json.contains("\"overlay\""));
    }
}
