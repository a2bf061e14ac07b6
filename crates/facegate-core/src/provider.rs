//! Embedding provider boundary.
//!
//! Callers hand an image across this boundary and get back a tagged
//! [`FaceScan`] — "no face" is an expected outcome, not an error, and
//! callers branch on the variant instead of catching failures.

use crate::detector::FaceDetector;
use crate::embedder::FaceEmbedder;
use crate::types::Embedding;
use thiserror::Error;

/// An image handed to the embedding provider.
#[derive(Debug, Clone)]
pub enum ImageData {
    /// Encoded image bytes (JPEG/PNG upload or reference file).
    Encoded(Vec<u8>),
    /// Raw grayscale pixels, e.g. a camera frame.
    Gray {
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    },
}

/// Outcome of scanning an image for a face.
#[derive(Debug, Clone)]
pub enum FaceScan {
    /// No face found in the image.
    NoFace,
    /// Embedding of the most confident detected face.
    Face(Embedding),
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("detector inference failed: {0}")]
    Detector(String),
    #[error("embedder inference failed: {0}")]
    Embedder(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

// Session-builder methods surface errors tagged with the builder type
// (`ort::Error<SessionBuilder>`); fold them into the plain `ort::Error`
// variant so `?` works on the load path.
impl From<ort::Error<ort::session::builder::SessionBuilder>> for ProviderError {
    fn from(err: ort::Error<ort::session::builder::SessionBuilder>) -> Self {
        ProviderError::Ort(err.into())
    }
}

/// Boundary to the face-embedding capability.
pub trait EmbeddingProvider {
    /// Identifier of the embedding model configuration. The match threshold
    /// is defined per model id and must never be reused across models.
    fn model_id(&self) -> &str;

    /// Scan an image for a face and produce its embedding.
    fn scan(&mut self, image: &ImageData) -> Result<FaceScan, ProviderError>;
}

/// ONNX Runtime-backed provider: UltraFace detection, then a
/// MobileFaceNet-style embedder on the best face crop.
pub struct OnnxProvider {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxProvider {
    /// Load both models from disk. Fails fast if either file is missing.
    pub fn load(
        detector_path: &str,
        embedder_path: &str,
        model_id: &str,
    ) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(detector_path)?;
        let embedder = FaceEmbedder::load(embedder_path, model_id)?;
        Ok(Self { detector, embedder })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    fn scan(&mut self, image: &ImageData) -> Result<FaceScan, ProviderError> {
        let decoded;
        let (pixels, width, height): (&[u8], u32, u32) = match image {
            ImageData::Encoded(bytes) => {
                decoded = image::load_from_memory(bytes)
                    .map_err(|e| ProviderError::Decode(e.to_string()))?
                    .to_luma8();
                (decoded.as_raw(), decoded.width(), decoded.height())
            }
            ImageData::Gray {
                pixels,
                width,
                height,
            } => (pixels.as_slice(), *width, *height),
        };

        let faces = self.detector.detect(pixels, width, height)?;
        let Some(face) = faces.first() else {
            return Ok(FaceScan::NoFace);
        };

        tracing::debug!(
            confidence = face.confidence,
            faces = faces.len(),
            "embedding best detected face"
        );
        let embedding = self.embedder.embed(pixels, width, height, face)?;
        Ok(FaceScan::Face(embedding))
    }
}
