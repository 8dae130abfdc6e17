//! Geometry types for detection boxes and segmenter prompts.
//!
//! The detector emits axis-aligned boxes in original-image pixel
//! coordinates; the segmenter expects integer pixel boxes clipped to the
//! image bounds. The conversion preserves input ordering, which the whole
//! pipeline relies on to keep detections, masks and persisted records
//! aligned by index.

use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box in pixel coordinates.
///
/// Invariant: `x_min < x_max` and `y_min < y_max` for any box produced by
/// the detector. The serialized form uses the `xmin`/`ymin`/`xmax`/`ymax`
/// key names of the persisted JSON contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    #[serde(rename = "xmin")]
    pub x_min: f32,
    /// Top edge.
    #[serde(rename = "ymin")]
    pub y_min: f32,
    /// Right edge.
    #[serde(rename = "xmax")]
    pub x_max: f32,
    /// Bottom edge.
    #[serde(rename = "ymax")]
    pub y_max: f32,
}

impl BoundingBox {
    /// Creates a bounding box from corner coordinates.
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Returns the box width.
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    /// Returns the box height.
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Returns true if the box has no area.
    pub fn is_empty(&self) -> bool {
        self.x_max <= self.x_min || self.y_max <= self.y_min
    }
}

/// An integer pixel box prompt for the segmentation model, clipped to the
/// image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxPrompt {
    /// Left edge.
    pub x_min: i64,
    /// Top edge.
    pub y_min: i64,
    /// Right edge.
    pub x_max: i64,
    /// Bottom edge.
    pub y_max: i64,
}

impl BoxPrompt {
    /// Converts a detection box into a segmenter prompt.
    ///
    /// Coordinates are rounded to integers and clipped to
    /// `[0, width]` × `[0, height]`.
    pub fn from_box(bbox: &BoundingBox, image_width: u32, image_height: u32) -> Self {
        let clamp = |v: f32, max: u32| -> i64 { (v.round() as i64).clamp(0, max as i64) };
        Self {
            x_min: clamp(bbox.x_min, image_width),
            y_min: clamp(bbox.y_min, image_height),
            x_max: clamp(bbox.x_max, image_width),
            y_max: clamp(bbox.y_max, image_height),
        }
    }
}

/// Adapts detection boxes into segmenter prompts.
///
/// The output has exactly one prompt per input box, in the same order.
/// Downstream code zips segmentation output with the detections by index,
/// so this ordering is an invariant, not an implementation detail.
pub fn adapt_boxes(boxes: &[BoundingBox], image_width: u32, image_height: u32) -> Vec<BoxPrompt> {
    boxes
        .iter()
        .map(|bbox| BoxPrompt::from_box(bbox, image_width, image_height))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_dimensions() {
        let bbox = BoundingBox::new(10.0, 20.0, 50.0, 80.0);
        assert_eq!(bbox.width(), 40.0);
        assert_eq!(bbox.height(), 60.0);
        assert!(!bbox.is_empty());
    }

    #[test]
    fn test_box_prompt_clips_to_bounds() {
        let bbox = BoundingBox::new(-5.3, 10.6, 120.2, 99.4);
        let prompt = BoxPrompt::from_box(&bbox, 100, 100);
        assert_eq!(prompt.x_min, 0);
        assert_eq!(prompt.y_min, 11);
        assert_eq!(prompt.x_max, 100);
        assert_eq!(prompt.y_max, 99);
    }

    #[test]
    fn test_adapt_boxes_preserves_order() {
        let boxes = vec![
            BoundingBox::new(10.0, 10.0, 50.0, 50.0),
            BoundingBox::new(60.0, 5.0, 90.0, 40.0),
            BoundingBox::new(0.0, 70.0, 30.0, 95.0),
        ];
        let prompts = adapt_boxes(&boxes, 100, 100);
        assert_eq!(prompts.len(), boxes.len());
        for (prompt, bbox) in prompts.iter().zip(&boxes) {
            assert_eq!(prompt.x_min, bbox.x_min as i64);
            assert_eq!(prompt.y_min, bbox.y_min as i64);
        }
    }

    #[test]
    fn test_adapt_boxes_empty_input() {
        let prompts = adapt_boxes(&[], 640, 480);
        assert!(prompts.is_empty());
    }

    #[test]
    fn test_bounding_box_json_key_names() {
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_value(bbox).unwrap();
        assert_eq!(json["xmin"], 1.0);
        assert_eq!(json["ymin"], 2.0);
        assert_eq!(json["xmax"], 3.0);
        assert_eq!(json["ymax"], 4.0);
    }
}
