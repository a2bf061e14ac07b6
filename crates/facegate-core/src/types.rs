use serde::{Deserialize, Serialize};

/// Wire label for an unresolved identity.
pub const UNKNOWN_USER: &str = "UNKNOWN";

/// Face embedding vector plus the model configuration that produced it.
///
/// Distances are only comparable between embeddings of the same model
/// configuration; the catalog rejects mixed-model inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Identifier of the embedding model configuration (e.g. "mobilefacenet").
    pub model: String,
}

impl Embedding {
    /// Euclidean (L2) distance to another embedding.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Bounding box for a detected face, pixel coordinates in the source image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding {
            values: values.to_vec(),
            model: "test".into(),
        }
    }

    #[test]
    fn distance_identical_is_zero() {
        let a = emb(&[1.0, 2.0, 3.0]);
        assert!(a.distance(&a) < 1e-6);
    }

    #[test]
    fn distance_unit_axes() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!((a.distance(&b) - std::f32::consts::SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = emb(&[0.5, -1.0, 2.0]);
        let b = emb(&[-0.5, 1.0, 0.0]);
        assert!((a.distance(&b) - b.distance(&a)).abs() < 1e-6);
    }
}
