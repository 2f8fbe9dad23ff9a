//! Indexing and search pipeline tying together feature extraction,
//! fingerprinting, the image store and the index.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::Config;
use crate::error::ServiceError;
use crate::features::{self, Embedder, Embedding};
use crate::index::{ImageIndex, ImageRecord, ImageSummary, MemoryIndex, PersistentIndex, SearchHit};
use crate::metrics;
use crate::storage::{self, ImageStore};
use crate::verification::{self, Fingerprint, PerceptualHash, Verdict};

/// Result of storing and indexing an upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    /// Name the image is indexed under
    pub filename: String,
    /// Name supplied by the client
    pub original_name: String,
    /// Whether an existing entry with the same name was replaced
    pub replaced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub took_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub candidate: String,
    pub hamming_distance: u32,
    pub verdict: Verdict,
    pub label: &'static str,
    pub color: &'static str,
    pub description: &'static str,
    pub query_phash: PerceptualHash,
    pub candidate_phash: PerceptualHash,
    pub sha256_match: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub total_images: usize,
    pub model: String,
    pub dimension: usize,
    pub index: String,
}

/// Full metadata of an indexed image, without its embedding.
#[derive(Debug, Clone, Serialize)]
pub struct ImageMetadata {
    pub filename: String,
    pub path: String,
    pub uploaded_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    pub fingerprint: Fingerprint,
}

/// Output of the CPU-bound analysis step.
struct Analysis {
    embedding: Embedding,
    fingerprint: Fingerprint,
}

pub struct VisionEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn ImageIndex>,
    store: ImageStore,
    default_top_k: usize,
    max_top_k: usize,
}

impl VisionEngine {
    /// Create an engine. The index must have been built with `embedder`.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn ImageIndex>,
        store: ImageStore,
        default_top_k: usize,
        max_top_k: usize,
    ) -> Result<Self, ServiceError> {
        if index.dimension() != embedder.dimension() || index.model() != embedder.name() {
            return Err(ServiceError::IndexLoad(format!(
                "index holds {} ({} dims) but embedder is {} ({} dims)",
                index.model(),
                index.dimension(),
                embedder.name(),
                embedder.dimension()
            )));
        }
        let max_top_k = max_top_k.max(1);
        Ok(Self {
            embedder,
            index,
            store,
            default_top_k: default_top_k.clamp(1, max_top_k),
            max_top_k,
        })
    }

    /// Build the embedder, index and image store described by `config`.
    ///
    /// Fails if a persisted index cannot be loaded; there is no fallback to
    /// an empty index.
    pub async fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let embedder = config.embedding_model.build();

        let index: Arc<dyn ImageIndex> = if config.ephemeral_index {
            info!("EPHEMERAL_INDEX=true: index is kept in memory only");
            Arc::new(MemoryIndex::new(embedder.name(), embedder.dimension()))
        } else {
            Arc::new(
                PersistentIndex::open(config.index_path(), embedder.name(), embedder.dimension())
                    .await?,
            )
        };

        let store = ImageStore::new(config.images_dir());
        store.ensure_dir().await?;

        Self::new(embedder, index, store, config.search_top_k, config.max_top_k)
    }

    pub fn index(&self) -> &Arc<dyn ImageIndex> {
        &self.index
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    fn ensure_ready(&self) -> Result<(), ServiceError> {
        if self.index.is_ready() {
            Ok(())
        } else {
            Err(ServiceError::NotReady)
        }
    }

    /// Decode, embed and fingerprint on the blocking pool.
    async fn analyze(&self, bytes: Arc<[u8]>) -> Result<Analysis, ServiceError> {
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || -> Result<Analysis, ServiceError> {
            let image = features::decode(&bytes)?;
            let embedding = embedder.embed(&image)?;
            let fingerprint = verification::fingerprint(&bytes, &image)?;
            Ok(Analysis {
                embedding,
                fingerprint,
            })
        })
        .await?
    }

    async fn embed_only(&self, bytes: Arc<[u8]>) -> Result<Embedding, ServiceError> {
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || -> Result<Embedding, ServiceError> {
            let image = features::decode(&bytes)?;
            embedder.embed(&image)
        })
        .await?
    }

    /// Store `bytes` as `filename` and add it to the index. If indexing
    /// fails, the file is restored to its previous content, or removed when
    /// there was none.
    async fn store_and_index(
        &self,
        filename: String,
        original_name: &str,
        bytes: Arc<[u8]>,
    ) -> Result<UploadOutcome, ServiceError> {
        self.ensure_ready()?;
        let analysis = self.analyze(Arc::clone(&bytes)).await?;
        let previous = self.store.read_if_exists(&filename).await?;
        let path = self.store.save(&filename, &bytes).await?;

        let record = ImageRecord {
            filename: filename.clone(),
            path: path.display().to_string(),
            embedding: analysis.embedding,
            fingerprint: analysis.fingerprint,
            uploaded_at: Utc::now(),
        };

        let replaced = match self.index.insert(record).await {
            Ok(replaced) => replaced,
            Err(e) => {
                error!(
                    error = %e,
                    filename = %filename,
                    restoring = previous.is_some(),
                    "Indexing failed, rolling back stored file"
                );
                let rollback = match previous {
                    Some(previous) => self.store.save(&filename, &previous).await.map(|_| ()),
                    None => self.store.remove(&filename).await,
                };
                if let Err(cleanup) = rollback {
                    error!(error = %cleanup, filename = %filename, "Rollback failed");
                }
                return Err(e);
            }
        };

        metrics::increment_index_count();
        metrics::set_indexed_images(self.index.len().await);

        info!(
            filename = %filename,
            original_name = %original_name,
            replaced = replaced.is_some(),
            "Image indexed"
        );

        Ok(UploadOutcome {
            filename,
            original_name: original_name.to_string(),
            replaced: replaced.is_some(),
        })
    }

    /// Store an upload under a generated unique name and index it.
    #[instrument(skip(self, bytes))]
    pub async fn upload(
        &self,
        original_name: &str,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<UploadOutcome, ServiceError> {
        let bytes = bytes.into();
        let filename = storage::unique_filename(original_name);
        self.store_and_index(filename, original_name, bytes).await
    }

    /// Store an upload under its (sanitised) original name and index it,
    /// replacing any previous image with that name.
    #[instrument(skip(self, bytes))]
    pub async fn index_named(
        &self,
        name: &str,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<UploadOutcome, ServiceError> {
        let bytes = bytes.into();
        let filename = storage::sanitize_filename(name)?;
        self.store_and_index(filename, name, bytes).await
    }

    /// Find the indexed images most similar to the query image. The query
    /// image is not stored.
    #[instrument(skip(self, bytes))]
    pub async fn search(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        top_k: Option<usize>,
    ) -> Result<SearchOutcome, ServiceError> {
        self.ensure_ready()?;
        let start = Instant::now();
        let top_k = top_k.unwrap_or(self.default_top_k).clamp(1, self.max_top_k);

        let query = self.embed_only(bytes.into()).await?;
        let hits = self.index.search(&query, top_k).await?;

        let took_ms = start.elapsed().as_millis() as u64;
        metrics::record_search_latency(start.elapsed().as_secs_f64() * 1000.0);
        metrics::increment_search_count();

        info!(top_k, hits = hits.len(), took_ms, "Search completed");

        Ok(SearchOutcome { hits, took_ms })
    }

    /// Compare a query image against a stored candidate by perceptual hash.
    #[instrument(skip(self, bytes))]
    pub async fn verify(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        candidate: &str,
    ) -> Result<VerificationReport, ServiceError> {
        self.ensure_ready()?;
        let record = self
            .index
            .get(candidate)
            .await
            .ok_or_else(|| ServiceError::NotFound(candidate.to_string()))?;

        let bytes: Arc<[u8]> = bytes.into();
        let (query_phash, query_sha) = tokio::task::spawn_blocking(move || {
            let image = features::decode(&bytes)?;
            Ok::<_, ServiceError>((
                verification::perceptual_hash(&image),
                verification::sha256_hex(&bytes),
            ))
        })
        .await??;

        let candidate_phash = record.fingerprint.phash;
        let distance = query_phash.distance(&candidate_phash);
        let verdict = Verdict::from_distance(distance);

        info!(candidate, distance, verdict = ?verdict, "Verification completed");

        Ok(VerificationReport {
            candidate: record.filename,
            hamming_distance: distance,
            verdict,
            label: verdict.label(),
            color: verdict.color(),
            description: verdict.description(),
            query_phash,
            candidate_phash,
            sha256_match: query_sha == record.fingerprint.sha256,
        })
    }

    pub async fn status(&self) -> StatusReport {
        StatusReport {
            status: "running",
            total_images: self.index.len().await,
            model: self.index.model().to_string(),
            dimension: self.index.dimension(),
            index: self.index.location(),
        }
    }

    pub async fn list(&self) -> Vec<ImageSummary> {
        self.index.list().await
    }

    pub async fn metadata(&self, filename: &str) -> Result<ImageMetadata, ServiceError> {
        let record = self
            .index
            .get(filename)
            .await
            .ok_or_else(|| ServiceError::NotFound(filename.to_string()))?;

        Ok(ImageMetadata {
            filename: record.filename,
            path: record.path,
            uploaded_at: record.uploaded_at,
            fingerprint: record.fingerprint,
        })
    }

    /// Raw bytes and content type of a stored image.
    pub async fn image(&self, filename: &str) -> Result<(Vec<u8>, &'static str), ServiceError> {
        let bytes = self.store.read(filename).await?;
        Ok((bytes, storage::content_type(filename)))
    }
}
