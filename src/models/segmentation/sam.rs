//! SAM promptable segmentation model.
//!
//! Wraps the two-session ONNX export of a Segment Anything model: an image
//! encoder producing embeddings and a prompt decoder producing mask logits
//! at original image resolution. Box prompts are fed to the decoder as the
//! standard top-left/bottom-right point pair with labels 2 and 3.
//!
//! Tensor names follow the common SAM export layout: the encoder takes
//! `images` and returns `embeddings`; the decoder takes
//! `image_embeddings`, `point_coords`, `point_labels`, `mask_input`,
//! `has_mask_input` and `orig_im_size`, and returns `masks` logits.

use crate::core::config::OrtSessionConfig;
use crate::core::errors::{DetSegError, DetSegResult};
use crate::core::traits::BoxSegmenter;
use crate::processors::{BoxPrompt, Mask};
use image::RgbImage;
use ndarray::{Array1, Array2, Array3, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use tracing::warn;

/// SAM pixel normalization mean (RGB).
const SAM_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
/// SAM pixel normalization std (RGB).
const SAM_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Point labels marking a box prompt's corners.
const BOX_TOP_LEFT_LABEL: f32 = 2.0;
const BOX_BOTTOM_RIGHT_LABEL: f32 = 3.0;

/// Configuration for the SAM segmenter.
#[derive(Debug, Clone)]
pub struct SamConfig {
    /// Longest-side input resolution of the encoder (1024 for SAM).
    pub input_size: u32,
    /// Probability cutoff applied to sigmoided mask logits.
    ///
    /// Calibration differs across model families (0.5 for SAM v1 exports,
    /// 0.9 for some SAM2 exports), so this is configuration rather than a
    /// constant.
    pub mask_threshold: f32,
}

impl Default for SamConfig {
    fn default() -> Self {
        Self {
            input_size: 1024,
            mask_threshold: 0.5,
        }
    }
}

/// SAM segmenter backed by encoder and decoder ONNX Runtime sessions.
#[derive(Debug)]
pub struct SamSegmenter {
    encoder: Session,
    decoder: Session,
    config: SamConfig,
    model_name: String,
}

impl SamSegmenter {
    /// Loads the segmenter from its encoder and decoder ONNX exports.
    pub fn new(
        encoder_path: &Path,
        decoder_path: &Path,
        config: SamConfig,
        ort_config: Option<&OrtSessionConfig>,
    ) -> DetSegResult<Self> {
        let model_name = "sam".to_string();
        let encoder = Self::load_session(&model_name, encoder_path, ort_config)?;
        let decoder = Self::load_session(&model_name, decoder_path, ort_config)?;
        Ok(Self {
            encoder,
            decoder,
            config,
            model_name,
        })
    }

    fn load_session(
        model_name: &str,
        path: &Path,
        ort_config: Option<&OrtSessionConfig>,
    ) -> DetSegResult<Session> {
        if !path.exists() {
            return Err(DetSegError::model_unavailable(
                model_name,
                format!("model file not found: {}", path.display()),
            ));
        }
        let mut builder = Session::builder().map_err(|e| {
            DetSegError::model_unavailable_with_source(model_name, "session builder", e)
        })?;
        if let Some(ort_config) = ort_config {
            builder = ort_config.apply(builder).map_err(|e| {
                DetSegError::model_unavailable_with_source(model_name, "session options", e)
            })?;
        }
        builder.commit_from_file(path).map_err(|e| {
            DetSegError::model_unavailable_with_source(
                model_name,
                format!("failed to load '{}'", path.display()),
                e,
            )
        })
    }

    /// Resizes (longest side), pads and normalizes the image into the
    /// encoder's CHW tensor.
    fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.config.input_size;
        let scale = input_scale(image.width(), image.height(), size);
        let new_w = ((image.width() as f32 * scale).round() as u32).max(1);
        let new_h = ((image.height() as f32 * scale).round() as u32).max(1);
        let resized = image::imageops::resize(
            image,
            new_w,
            new_h,
            image::imageops::FilterType::Triangle,
        );

        // Padding pixels stay at the normalized zero value.
        let mut pixels = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                pixels[[0, channel, y as usize, x as usize]] =
                    (pixel[channel] as f32 - SAM_MEAN[channel]) / SAM_STD[channel];
            }
        }
        pixels
    }

    /// Runs the encoder and copies the embeddings into an owned array.
    fn embed(&mut self, image: &RgbImage) -> DetSegResult<Array4<f32>> {
        let pixels = self.preprocess(image);
        let pixels_tensor = TensorRef::from_array_view(&pixels)?;
        let outputs = self
            .encoder
            .run(ort::inputs!["images" => pixels_tensor])
            .map_err(|e| DetSegError::inference(&self.model_name, "image encoder", e))?;

        let (shape, data) = outputs["embeddings"].try_extract_tensor::<f32>()?;
        if shape.len() != 4 {
            return Err(DetSegError::inference(
                &self.model_name,
                format!("unexpected embeddings shape {shape:?}"),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            ));
        }
        let embeddings = Array4::from_shape_vec(
            (
                shape[0] as usize,
                shape[1] as usize,
                shape[2] as usize,
                shape[3] as usize,
            ),
            data.to_vec(),
        )?;
        Ok(embeddings)
    }

    /// Decodes one box prompt into a mask, or `None` when the model
    /// returns no mask for it.
    fn decode_prompt(
        &mut self,
        embeddings: &Array4<f32>,
        prompt: &BoxPrompt,
        scale: f32,
        image_width: u32,
        image_height: u32,
    ) -> DetSegResult<Option<Mask>> {
        let point_coords = Array3::from_shape_vec(
            (1, 2, 2),
            vec![
                prompt.x_min as f32 * scale,
                prompt.y_min as f32 * scale,
                prompt.x_max as f32 * scale,
                prompt.y_max as f32 * scale,
            ],
        )?;
        let point_labels =
            Array2::from_shape_vec((1, 2), vec![BOX_TOP_LEFT_LABEL, BOX_BOTTOM_RIGHT_LABEL])?;
        let mask_input = Array4::<f32>::zeros((1, 1, 256, 256));
        let has_mask_input = Array1::from_vec(vec![0.0f32]);
        let orig_im_size =
            Array1::from_vec(vec![image_height as f32, image_width as f32]);

        let embeddings_tensor = TensorRef::from_array_view(embeddings)?;
        let coords_tensor = TensorRef::from_array_view(&point_coords)?;
        let labels_tensor = TensorRef::from_array_view(&point_labels)?;
        let mask_tensor = TensorRef::from_array_view(&mask_input)?;
        let has_mask_tensor = TensorRef::from_array_view(&has_mask_input)?;
        let size_tensor = TensorRef::from_array_view(&orig_im_size)?;

        let outputs = self
            .decoder
            .run(ort::inputs![
                "image_embeddings" => embeddings_tensor,
                "point_coords" => coords_tensor,
                "point_labels" => labels_tensor,
                "mask_input" => mask_tensor,
                "has_mask_input" => has_mask_tensor,
                "orig_im_size" => size_tensor
            ])
            .map_err(|e| DetSegError::inference(&self.model_name, "mask decoder", e))?;

        let (shape, logits) = outputs["masks"].try_extract_tensor::<f32>()?;
        if shape.len() != 4 || shape[1] == 0 {
            return Ok(None);
        }

        let height = shape[2] as u32;
        let width = shape[3] as u32;
        if height != image_height || width != image_width {
            return Err(DetSegError::inference(
                &self.model_name,
                format!(
                    "decoder returned {width}x{height} mask for {image_width}x{image_height} image"
                ),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            ));
        }

        // Only the first mask candidate is used (single-mask export).
        let plane = width as usize * height as usize;
        let mask = Mask::from_logits(width, height, &logits[..plane], self.config.mask_threshold)?;
        Ok(Some(mask))
    }
}

impl BoxSegmenter for SamSegmenter {
    fn segment(
        &mut self,
        image: &RgbImage,
        prompts: &[BoxPrompt],
    ) -> DetSegResult<Vec<Option<Mask>>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        let scale = input_scale(image.width(), image.height(), self.config.input_size);
        let embeddings = self.embed(image)?;

        let mut masks = Vec::with_capacity(prompts.len());
        for (index, prompt) in prompts.iter().enumerate() {
            let mask =
                self.decode_prompt(&embeddings, prompt, scale, image.width(), image.height())?;
            if mask.is_none() {
                warn!(
                    prompt_index = index,
                    "segmenter produced no mask for box prompt"
                );
            }
            masks.push(mask);
        }
        Ok(masks)
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Scale factor mapping original pixel coordinates into the encoder's
/// longest-side input space.
fn input_scale(width: u32, height: u32, input_size: u32) -> f32 {
    input_size as f32 / width.max(height).max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fails_with_missing_models() {
        let err = SamSegmenter::new(
            Path::new("missing_encoder.onnx"),
            Path::new("missing_decoder.onnx"),
            SamConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DetSegError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_input_scale_longest_side() {
        assert_eq!(input_scale(2048, 1024, 1024), 0.5);
        assert_eq!(input_scale(512, 1024, 1024), 1.0);
        assert_eq!(input_scale(1024, 1024, 1024), 1.0);
    }

    #[test]
    fn test_default_config() {
        let config = SamConfig::default();
        assert_eq!(config.input_size, 1024);
        assert_eq!(config.mask_threshold, 0.5);
    }
}
