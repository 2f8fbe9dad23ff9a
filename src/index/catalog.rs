//! ImageIndex trait defining the interface for storing and querying embeddings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::features::Embedding;
use crate::verification::{Fingerprint, PerceptualHash};

/// A stored image and everything extracted from it at indexing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Name the image is stored and searched under
    pub filename: String,
    /// Location of the stored file
    pub path: String,
    pub embedding: Embedding,
    pub fingerprint: Fingerprint,
    pub uploaded_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            filename: self.filename.clone(),
            uploaded_at: self.uploaded_at,
            phash: self.fingerprint.phash,
            manipulation_score: self.fingerprint.manipulation_score,
        }
    }
}

/// Listing entry for an indexed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub phash: PerceptualHash,
    pub manipulation_score: f32,
}

/// A single search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub filename: String,
    /// Cosine similarity (0.0 to 1.0)
    pub similarity: f32,
}

/// Trait defining the interface for image index operations.
///
/// Implementations include:
/// - `MemoryIndex` - In-memory only
/// - `PersistentIndex` - Snapshot-backed
#[async_trait]
pub trait ImageIndex: Send + Sync {
    /// Insert a record, replacing any existing record with the same filename.
    ///
    /// # Returns
    /// The replaced record, if there was one
    async fn insert(&self, record: ImageRecord) -> Result<Option<ImageRecord>, ServiceError>;

    /// Exhaustive similarity search.
    ///
    /// # Arguments
    /// * `query` - Normalised query embedding
    /// * `top_k` - Maximum number of results to return
    ///
    /// # Returns
    /// Hits ordered by similarity (descending), ties broken by filename
    async fn search(&self, query: &Embedding, top_k: usize)
        -> Result<Vec<SearchHit>, ServiceError>;

    /// Look up a single record by filename.
    async fn get(&self, filename: &str) -> Option<ImageRecord>;

    /// Summaries of every indexed image, sorted by filename.
    async fn list(&self) -> Vec<ImageSummary>;

    /// Number of indexed images.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Identifier of the embedding model the index was built with.
    fn model(&self) -> &str;

    /// Length of every stored embedding.
    fn dimension(&self) -> usize;

    /// Human-readable location of the index (file path or memory://).
    fn location(&self) -> String;

    /// Check if the index is ready to handle requests.
    ///
    /// Both bundled indexes are fully loaded once constructed and always
    /// report ready. An index that loads or syncs in the background reports
    /// `false` until it can serve, which turns `/health` into a 503 and makes
    /// the engine reject work with `NotReady`.
    fn is_ready(&self) -> bool;
}
