//! Snapshot-backed index.
//!
//! Keeps the working set in a `MemoryIndex` and rewrites a JSON snapshot
//! after every insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info};

use super::catalog::{ImageIndex, ImageRecord, ImageSummary, SearchHit};
use super::memory::MemoryIndex;
use crate::error::ServiceError;
use crate::features::Embedding;

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk representation of the index.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub model: String,
    pub dimension: usize,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<ImageRecord>,
}

pub struct PersistentIndex {
    /// Path to the snapshot file
    path: PathBuf,
    inner: MemoryIndex,
    /// Serialises insert + snapshot so the file always reflects the latest write
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for PersistentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentIndex")
            .field("path", &self.path)
            .field("model", &self.inner.model())
            .finish_non_exhaustive()
    }
}

impl PersistentIndex {
    /// Open the snapshot at `path`, or start empty if it does not exist.
    ///
    /// # Errors
    /// Returns `IndexLoad` if:
    /// - The snapshot is not valid JSON
    /// - The snapshot was written with another layout version
    /// - The snapshot was built with a different model or dimension
    pub async fn open(
        path: impl AsRef<Path>,
        model: &str,
        dimension: usize,
    ) -> Result<Self, ServiceError> {
        let path = path.as_ref().to_path_buf();

        info!(path = %path.display(), model, "Opening image index");

        let inner = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: IndexSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    error!(error = %e, path = %path.display(), "Corrupt index snapshot");
                    ServiceError::IndexLoad(format!("{}: {}", path.display(), e))
                })?;

                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(ServiceError::IndexLoad(format!(
                        "{} has snapshot version {}, expected {}",
                        path.display(),
                        snapshot.version,
                        SNAPSHOT_VERSION
                    )));
                }

                if snapshot.model != model || snapshot.dimension != dimension {
                    return Err(ServiceError::IndexLoad(format!(
                        "{} was built with {} ({} dims), configured model is {} ({} dims)",
                        path.display(),
                        snapshot.model,
                        snapshot.dimension,
                        model,
                        dimension
                    )));
                }

                MemoryIndex::with_records(model, dimension, snapshot.records)
                    .map_err(|e| ServiceError::IndexLoad(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting with an empty index");
                MemoryIndex::new(model, dimension)
            }
            Err(e) => return Err(ServiceError::IndexLoad(e.to_string())),
        };

        info!(
            path = %path.display(),
            total_images = inner.len().await,
            "Image index loaded"
        );

        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current records to disk via a temp file and rename.
    async fn save(&self) -> Result<(), ServiceError> {
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            model: self.inner.model().to_string(),
            dimension: self.inner.dimension(),
            saved_at: Utc::now(),
            records: self.inner.records().await,
        };

        let json = serde_json::to_vec(&snapshot)
            .map_err(|e| ServiceError::Internal(format!("Snapshot encode failed: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl ImageIndex for PersistentIndex {
    async fn insert(&self, record: ImageRecord) -> Result<Option<ImageRecord>, ServiceError> {
        let _guard = self.write_lock.lock().await;
        let filename = record.filename.clone();
        let replaced = self.inner.insert(record).await?;

        if let Err(e) = self.save().await {
            error!(error = %e, filename = %filename, "Failed to persist index snapshot");
            // Roll back so memory and disk stay consistent.
            match replaced.clone() {
                Some(previous) => {
                    self.inner.insert(previous).await?;
                }
                None => {
                    self.inner.remove(&filename).await;
                }
            }
            return Err(e);
        }

        Ok(replaced)
    }

    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        self.inner.search(query, top_k).await
    }

    async fn get(&self, filename: &str) -> Option<ImageRecord> {
        self.inner.get(filename).await
    }

    async fn list(&self) -> Vec<ImageSummary> {
        self.inner.list().await
    }

    async fn len(&self) -> usize {
        self.inner.len().await
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }
}
