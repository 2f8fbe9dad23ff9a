//! Feature extraction turning decoded images into searchable embeddings.
//!
//! This module provides an `Embedder` trait and implementations:
//! - `ColorHistogramEmbedder` - Joint RGB color histogram (512 dims)
//! - `SpatialColorEmbedder` - Grid color layout plus grayscale thumbnail (320 dims)

mod embedder;
mod histogram;
mod spatial;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use embedder::{decode, preprocess, Embedder, Embedding, INPUT_SIZE};
pub use histogram::ColorHistogramEmbedder;
pub use spatial::SpatialColorEmbedder;

/// Embedders selectable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingModel {
    #[default]
    ColorHistogram,
    SpatialColor,
}

impl EmbeddingModel {
    /// Instantiate the embedder for this model.
    pub fn build(self) -> Arc<dyn Embedder> {
        match self {
            EmbeddingModel::ColorHistogram => Arc::new(ColorHistogramEmbedder::new()),
            EmbeddingModel::SpatialColor => Arc::new(SpatialColorEmbedder::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingModel::ColorHistogram => "color-histogram",
            EmbeddingModel::SpatialColor => "spatial-color",
        }
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "color-histogram" | "histogram" => Ok(EmbeddingModel::ColorHistogram),
            "spatial-color" | "spatial" => Ok(EmbeddingModel::SpatialColor),
            other => Err(format!("unknown embedding model: {}", other)),
        }
    }
}
