//! Embedder trait and the embedding vector type.

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Side length images are resized to before feature extraction.
pub const INPUT_SIZE: u32 = 224;

/// Dense feature vector. Stored L2-normalised so the inner product of two
/// embeddings is their cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Build an embedding, scaling `values` to unit length.
    ///
    /// An all-zero vector is kept as is.
    pub fn normalized(mut values: Vec<f32>) -> Self {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut values {
                *v /= norm;
            }
        }
        Self(values)
    }

    /// Inner product with another embedding of the same dimension.
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Trait defining the interface for image feature extraction.
///
/// Implementations are synchronous and CPU-bound; callers run them on the
/// blocking thread pool.
pub trait Embedder: Send + Sync {
    /// Model identifier reported by the status endpoint and stored in snapshots.
    fn name(&self) -> &'static str;

    /// Length of every embedding this model produces.
    fn dimension(&self) -> usize;

    /// Extract a normalised embedding from a decoded image.
    fn embed(&self, image: &DynamicImage) -> Result<Embedding, ServiceError>;
}

/// Decode uploaded bytes into an image.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ServiceError> {
    if bytes.is_empty() {
        return Err(ServiceError::InvalidImage("empty file".into()));
    }
    image::load_from_memory(bytes).map_err(|e| ServiceError::InvalidImage(e.to_string()))
}

/// Convert to RGB and resize to the fixed model input size.
pub fn preprocess(image: &DynamicImage) -> RgbImage {
    image
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Lanczos3)
        .to_rgb8()
}
