//! Face embedder via ONNX Runtime.
//!
//! Crops the detected face with a small margin, resizes to 112×112 and
//! runs a MobileFaceNet-style recognition model producing a
//! 128-dimensional L2-normalized embedding.

use crate::detector::resize_bilinear;
use crate::provider::ProviderError;
use crate::types::{Embedding, FaceBox};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants (different from the detector!) ---
const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5; // symmetric normalization, matching ArcFace-family training
const EMBED_DIM: usize = 128;
/// Fraction of the box size added on each side before cropping.
const EMBED_CROP_MARGIN: f32 = 0.1;

/// MobileFaceNet-style face embedder.
pub struct FaceEmbedder {
    session: Session,
    model_id: String,
}

impl FaceEmbedder {
    /// Load the embedder ONNX model from the given path.
    ///
    /// `model_id` names the model configuration; it is stamped on every
    /// produced embedding so thresholds stay paired with their model.
    pub fn load(model_path: &str, model_id: &str) -> Result<Self, ProviderError> {
        if !Path::new(model_path).exists() {
            return Err(ProviderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, model = model_id, "loaded face embedder");

        Ok(Self {
            session,
            model_id: model_id.to_string(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Extract an embedding for a detected face in a grayscale image.
    pub fn embed(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        face: &FaceBox,
    ) -> Result<Embedding, ProviderError> {
        let crop = crop_face(gray, width as usize, height as usize, face);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ProviderError::Embedder(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != EMBED_DIM {
            return Err(ProviderError::Embedder(format!(
                "expected {EMBED_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so distances live on a common scale
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model: self.model_id.clone(),
        })
    }
}

/// Crop the face box (with margin, clamped to the image) and resize to 112×112.
fn crop_face(gray: &[u8], width: usize, height: usize, face: &FaceBox) -> Vec<u8> {
    let margin_x = face.width * EMBED_CROP_MARGIN;
    let margin_y = face.height * EMBED_CROP_MARGIN;

    let x0 = ((face.x - margin_x).floor().max(0.0) as usize).min(width - 1);
    let y0 = ((face.y - margin_y).floor().max(0.0) as usize).min(height - 1);
    let x1 = ((face.x + face.width + margin_x).ceil() as usize).clamp(x0 + 1, width);
    let y1 = ((face.y + face.height + margin_y).ceil() as usize).clamp(y0 + 1, height);

    let crop_w = x1 - x0;
    let crop_h = y1 - y0;

    let mut crop = vec![0u8; crop_w * crop_h];
    for row in 0..crop_h {
        let src_start = (y0 + row) * width + x0;
        let dst_start = row * crop_w;
        crop[dst_start..dst_start + crop_w]
            .copy_from_slice(&gray[src_start..src_start + crop_w]);
    }

    resize_bilinear(&crop, crop_w, crop_h, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE)
}

/// Preprocess a 112×112 grayscale crop into a NCHW float tensor.
fn preprocess(crop: &[u8]) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = crop.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - EMBED_MEAN) / EMBED_STD;
            // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}
