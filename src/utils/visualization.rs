//! Overlay rendering for detection and segmentation results.
//!
//! All drawing happens on a copy of the input image; the original is never
//! mutated. Label colors are derived from a stable hash of the label
//! string, so the same label gets the same color in every run and artifact
//! output is reproducible byte-for-byte. Masks are composited in detection
//! order; where they overlap, later masks paint over earlier ones.

use crate::pipeline::result::Detection;
use crate::processors::Mask;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::warn;

/// Fixed opacity used when blending mask fills onto the image.
pub const MASK_ALPHA: f32 = 0.5;

/// Box outline thickness in pixels.
const BOX_THICKNESS: i32 = 3;

/// Padding around label text inside its background plate.
const PLATE_PADDING: i32 = 2;

/// Styling for overlay rendering.
///
/// The font is optional: without one, boxes and masks are still drawn and
/// only the text labels are skipped, keeping output deterministic either
/// way.
pub struct OverlayStyle {
    /// Label font, if one could be loaded.
    pub font: Option<FontVec>,
    /// Label text size in pixels.
    pub font_scale: f32,
    /// Mask fill opacity.
    pub mask_alpha: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font: None,
            font_scale: 18.0,
            mask_alpha: MASK_ALPHA,
        }
    }
}

impl OverlayStyle {
    /// Loads the label font from a TTF/OTF file, degrading to label-free
    /// rendering (with a warning) when the file is missing or invalid.
    pub fn with_font_path(path: Option<&Path>) -> Self {
        let font = path.and_then(|path| match std::fs::read(path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "invalid label font, rendering without text");
                    None
                }
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read label font, rendering without text");
                None
            }
        });
        Self {
            font,
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for OverlayStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayStyle")
            .field("font", &self.font.is_some())
            .field("font_scale", &self.font_scale)
            .field("mask_alpha", &self.mask_alpha)
            .finish()
    }
}

/// Derives a stable color from a label string.
///
/// FNV-1a over the label bytes, mapped into the 60..=255 range per channel
/// so every label color stays visible against most backgrounds. No
/// randomness: the same label yields the same color in every process.
pub fn color_for_label(label: &str) -> Rgb<u8> {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in label.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    let channel = |shift: u64| -> u8 { 60 + ((hash >> shift) % 196) as u8 };
    Rgb([channel(0), channel(24), channel(48)])
}

/// Renders the full overlay: mask fills, box outlines and text labels for
/// every (detection, mask) pair, composited in order onto a copy of
/// `image`.
///
/// `detections` and `masks` must be index-aligned; extra entries on either
/// side are ignored.
pub fn render_overlay(
    image: &RgbImage,
    detections: &[Detection],
    masks: &[Mask],
    style: &OverlayStyle,
) -> RgbImage {
    let mut canvas = image.clone();
    for (det, mask) in detections.iter().zip(masks) {
        let color = color_for_label(&det.label);
        blend_mask(&mut canvas, mask, color, style.mask_alpha);
    }
    for det in detections.iter().take(masks.len()) {
        let color = color_for_label(&det.label);
        draw_detection(&mut canvas, det, color, style);
    }
    canvas
}

/// Renders the boxes-only visualization (no masks) onto a copy of `image`.
pub fn draw_boxes(image: &RgbImage, detections: &[Detection], style: &OverlayStyle) -> RgbImage {
    let mut canvas = image.clone();
    for det in detections {
        let color = color_for_label(&det.label);
        draw_detection(&mut canvas, det, color, style);
    }
    canvas
}

/// Renders a single mask blended onto a copy of `image`, used for the
/// per-detection `mask_overlay_{i}` artifacts.
pub fn overlay_mask(image: &RgbImage, mask: &Mask, color: Rgb<u8>, alpha: f32) -> RgbImage {
    let mut canvas = image.clone();
    blend_mask(&mut canvas, mask, color, alpha);
    canvas
}

fn blend_mask(canvas: &mut RgbImage, mask: &Mask, color: Rgb<u8>, alpha: f32) {
    let width = canvas.width().min(mask.width());
    let height = canvas.height().min(mask.height());
    for y in 0..height {
        for x in 0..width {
            if mask.get(x, y) {
                let pixel = canvas.get_pixel_mut(x, y);
                for channel in 0..3 {
                    let base = pixel[channel] as f32;
                    let tint = color[channel] as f32;
                    pixel[channel] = (base * (1.0 - alpha) + tint * alpha).round() as u8;
                }
            }
        }
    }
}

fn draw_detection(canvas: &mut RgbImage, det: &Detection, color: Rgb<u8>, style: &OverlayStyle) {
    let width = canvas.width() as i32;
    let height = canvas.height() as i32;

    let x_min = (det.bbox.x_min.round() as i32).clamp(0, width - 1);
    let y_min = (det.bbox.y_min.round() as i32).clamp(0, height - 1);
    let x_max = (det.bbox.x_max.round() as i32).clamp(0, width - 1);
    let y_max = (det.bbox.y_max.round() as i32).clamp(0, height - 1);
    if x_min >= x_max || y_min >= y_max {
        return;
    }

    // Outline, thickened inward.
    for t in 0..BOX_THICKNESS {
        let w = x_max - x_min - 2 * t;
        let h = y_max - y_min - 2 * t;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x_min + t, y_min + t).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }

    let Some(font) = &style.font else {
        return;
    };

    let text = format!("{} {:.2}", det.label, det.score);
    let scale = PxScale::from(style.font_scale);
    let (text_w, text_h) = text_size(scale, font, &text);
    let plate_w = text_w as i32 + 2 * PLATE_PADDING;
    let plate_h = text_h as i32 + 2 * PLATE_PADDING;

    // Plate sits above the box; clamp so it never leaves the image when
    // the box touches the top edge.
    let plate_top = (y_min - plate_h).max(0);
    let plate_left = x_min.min((width - plate_w).max(0));

    draw_filled_rect_mut(
        canvas,
        Rect::at(plate_left, plate_top).of_size(plate_w as u32, plate_h as u32),
        color,
    );
    draw_text_mut(
        canvas,
        Rgb([255u8, 255u8, 255u8]),
        plate_left + PLATE_PADDING,
        plate_top + PLATE_PADDING,
        scale,
        font,
        &text,
    );
}
