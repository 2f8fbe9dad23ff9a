//! In-memory index with exhaustive inner-product search.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::catalog::{ImageIndex, ImageRecord, ImageSummary, SearchHit};
use crate::error::ServiceError;
use crate::features::Embedding;

/// Index that keeps every record in a map guarded by an async RwLock.
///
/// Nothing is written to disk; used when `EPHEMERAL_INDEX=true`, in tests,
/// and as the working set of `PersistentIndex`.
pub struct MemoryIndex {
    records: RwLock<HashMap<String, ImageRecord>>,
    model: String,
    dimension: usize,
}

impl MemoryIndex {
    /// Create an empty index for embeddings of `dimension` produced by `model`.
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            model: model.into(),
            dimension,
        }
    }

    /// Create an index pre-populated with `records`.
    pub fn with_records(
        model: impl Into<String>,
        dimension: usize,
        records: Vec<ImageRecord>,
    ) -> Result<Self, ServiceError> {
        let mut index = Self::new(model, dimension);
        let map = index.records.get_mut();
        for record in records {
            if record.embedding.dimension() != dimension {
                return Err(ServiceError::DimensionMismatch {
                    expected: dimension,
                    actual: record.embedding.dimension(),
                });
            }
            map.insert(record.filename.clone(), record);
        }
        Ok(index)
    }

    fn check_dimension(&self, embedding: &Embedding) -> Result<(), ServiceError> {
        if embedding.dimension() != self.dimension {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.dimension(),
            });
        }
        Ok(())
    }

    pub(crate) async fn remove(&self, filename: &str) -> Option<ImageRecord> {
        self.records.write().await.remove(filename)
    }

    /// Clone of every record, sorted by filename.
    pub async fn records(&self) -> Vec<ImageRecord> {
        let guard = self.records.read().await;
        let mut records: Vec<ImageRecord> = guard.values().cloned().collect();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        records
    }
}

#[async_trait]
impl ImageIndex for MemoryIndex {
    async fn insert(&self, record: ImageRecord) -> Result<Option<ImageRecord>, ServiceError> {
        self.check_dimension(&record.embedding)?;
        let mut guard = self.records.write().await;
        let replaced = guard.insert(record.filename.clone(), record);
        debug!(total = guard.len(), replaced = replaced.is_some(), "Record inserted");
        Ok(replaced)
    }

    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        self.check_dimension(query)?;
        let guard = self.records.read().await;

        let mut hits: Vec<SearchHit> = guard
            .values()
            .map(|record| SearchHit {
                filename: record.filename.clone(),
                similarity: query.dot(&record.embedding).clamp(0.0, 1.0),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        hits.truncate(top_k);

        Ok(hits)
    }

    async fn get(&self, filename: &str) -> Option<ImageRecord> {
        self.records.read().await.get(filename).cloned()
    }

    async fn list(&self) -> Vec<ImageSummary> {
        self.records().await.iter().map(ImageRecord::summary).collect()
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::verification::{Fingerprint, PerceptualHash};
    use chrono::Utc;

    pub(crate) fn record(filename: &str, values: Vec<f32>) -> ImageRecord {
        ImageRecord {
            filename: filename.to_string(),
            path: format!("data/images/{}", filename),
            embedding: Embedding::normalized(values),
            fingerprint: Fingerprint {
                sha256: "00".repeat(32),
                phash: PerceptualHash(0),
                manipulation_score: 1.5,
                width: 224,
                height: 224,
                format: Some("png".into()),
            },
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = MemoryIndex::new("test", 3);
        index.insert(record("a.png", vec![1.0, 0.0, 0.0])).await.unwrap();
        index.insert(record("b.png", vec![0.7, 0.7, 0.0])).await.unwrap();
        index.insert(record("c.png", vec![0.0, 0.0, 1.0])).await.unwrap();

        let query = Embedding::normalized(vec![1.0, 0.1, 0.0]);
        let hits = index.search(&query, 5).await.unwrap();

        let names: Vec<&str> = hits.iter().map(|h| h.filename.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.similarity)));
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[tokio::test]
    async fn test_search_truncates_to_top_k() {
        let index = MemoryIndex::new("test", 2);
        for i in 0..10 {
            index
                .insert(record(&format!("img_{}.png", i), vec![1.0, i as f32]))
                .await
                .unwrap();
        }

        let hits = index
            .search(&Embedding::normalized(vec![1.0, 0.0]), 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].filename, "img_0.png");
    }

    #[tokio::test]
    async fn test_ties_broken_by_filename() {
        let index = MemoryIndex::new("test", 2);
        index.insert(record("zebra.png", vec![1.0, 0.0])).await.unwrap();
        index.insert(record("apple.png", vec![1.0, 0.0])).await.unwrap();

        let hits = index
            .search(&Embedding::normalized(vec![1.0, 0.0]), 2)
            .await
            .unwrap();
        assert_eq!(hits[0].filename, "apple.png");
        assert_eq!(hits[1].filename, "zebra.png");
    }

    #[tokio::test]
    async fn test_empty_index_returns_no_hits() {
        let index = MemoryIndex::new("test", 2);
        let hits = index
            .search(&Embedding::normalized(vec![1.0, 0.0]), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_replaces_same_filename() {
        let index = MemoryIndex::new("test", 2);
        assert!(index
            .insert(record("cat.png", vec![1.0, 0.0]))
            .await
            .unwrap()
            .is_none());
        let replaced = index
            .insert(record("cat.png", vec![0.0, 1.0]))
            .await
            .unwrap();

        assert!(replaced.is_some());
        assert_eq!(index.len().await, 1);
        let stored = index.get("cat.png").await.unwrap();
        assert_eq!(stored.embedding.as_slice(), &[0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = MemoryIndex::new("test", 3);
        let err = index
            .insert(record("bad.png", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let err = index
            .search(&Embedding::normalized(vec![1.0]), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_list_sorted_by_filename() {
        let index = MemoryIndex::with_records(
            "test",
            2,
            vec![record("b.png", vec![1.0, 0.0]), record("a.png", vec![0.0, 1.0])],
        )
        .unwrap();

        let list = index.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].filename, "a.png");
        assert_eq!(list[1].filename, "b.png");
        assert!(index.is_ready());
        assert_eq!(index.location(), "memory://");
    }
}
