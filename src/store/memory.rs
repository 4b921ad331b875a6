//! In-memory [`VectorStore`] for tests and single-process setups.
//!
//! Collections live in a `HashMap` behind a tokio `RwLock`. Search is
//! brute-force cosine similarity over every point in the collection, with
//! filters evaluated against the JSON-rendered payload.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{validate_records, CollectionInfo, CollectionStatus, ScoredPoint, VectorFilter, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{IndexError, Result};
use crate::models::VectorRecord;

struct StoredPoint {
    record: VectorRecord,
    /// Payload as JSON, for filter evaluation.
    payload_json: serde_json::Value,
}

struct Collection {
    dims: usize,
    points: HashMap<String, StoredPoint>,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Ids of every point whose payload names `document_id`, sorted.
    pub async fn ids_for_document(&self, collection: &str, document_id: &str) -> Vec<String> {
        let collections = self.collections.read().await;
        let mut ids: Vec<String> = collections
            .get(collection)
            .map(|c| {
                c.points
                    .values()
                    .filter(|p| p.record.payload.metadata.document_id == document_id)
                    .map(|p| p.record.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Names of every collection, sorted.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(collection: &str) -> IndexError {
    IndexError::store(
        "memory",
        format!("collection '{}' does not exist", collection),
        false,
    )
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(collection) {
            if existing.dims != dims {
                return Err(IndexError::store(
                    "memory",
                    format!(
                        "collection '{}' has {} dimensions, requested {}",
                        collection, existing.dims, dims
                    ),
                    false,
                ));
            }
            return Ok(());
        }
        collections.insert(
            collection.to_string(),
            Collection {
                dims,
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        validate_records("memory", target.dims, records)?;

        for record in records {
            let payload_json = serde_json::to_value(&record.payload)
                .map_err(|e| IndexError::InvalidPayload(e.to_string()))?;
            target.points.insert(
                record.id.clone(),
                StoredPoint {
                    record: record.clone(),
                    payload_json,
                },
            );
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        threshold: f32,
        filter: &VectorFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        if vector.len() != target.dims {
            return Err(IndexError::store(
                "memory",
                format!(
                    "query has {} dimensions, collection has {}",
                    vector.len(),
                    target.dims
                ),
                false,
            ));
        }

        let mut hits: Vec<ScoredPoint> = target
            .points
            .values()
            .filter(|p| filter.matches(&p.payload_json))
            .map(|p| (p, cosine_similarity(vector, &p.record.vector)))
            .filter(|(_, score)| *score >= threshold)
            .map(|(p, score)| ScoredPoint {
                id: p.record.id.clone(),
                score,
                payload: p.record.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        for id in ids {
            target.points.remove(id);
        }
        Ok(())
    }

    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map(|c| CollectionInfo {
            count: c.points.len(),
            dims: c.dims,
            status: CollectionStatus::Green,
        }))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, ChunkType, DocumentKind, PayloadMetadata};

    fn record(doc: &str, index: usize, vector: Vec<f32>, language: &str) -> VectorRecord {
        let chunk = Chunk::new(
            doc,
            index,
            ChunkType::Paragraph,
            format!("chunk {} of {}", index, doc),
            ChunkMetadata::default(),
        );
        VectorRecord::new(
            &chunk,
            vector,
            PayloadMetadata {
                source: format!("{}.md", doc),
                document_id: doc.to_string(),
                kind: DocumentKind::Markdown,
                category: "documentation".into(),
                language: Some(language.into()),
                file_type: Some("md".into()),
                size: 10,
                modified: 0,
                tags: vec![],
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        let r = record("a", 0, vec![1.0, 0.0], "en");
        store.upsert("c", &[r.clone()]).await.unwrap();
        store.upsert("c", &[r]).await.unwrap();
        assert_eq!(store.collection_info("c").await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn search_applies_threshold_filter_and_order() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                &[
                    record("a", 0, vec![1.0, 0.0], "en"),
                    record("b", 0, vec![0.8, 0.6], "en"),
                    record("c", 0, vec![0.0, 1.0], "de"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("c", &[1.0, 0.0], 10, 0.5, &VectorFilter::default())
            .await
            .unwrap();
        let docs: Vec<&str> = hits
            .iter()
            .map(|h| h.payload.metadata.document_id.as_str())
            .collect();
        assert_eq!(docs, vec!["a", "b"]);

        let filter = VectorFilter::default().equals("metadata.language", "de");
        let hits = store.search("c", &[1.0, 0.0], 10, -1.0, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);

        let none = store
            .search("c", &[1.0, 0.0], 10, 0.99999, &VectorFilter::default())
            .await
            .unwrap();
        assert_eq!(none.len(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_not_transient() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 3).await.unwrap();
        let err = store
            .upsert("c", &[record("a", 0, vec![1.0, 0.0], "en")])
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(store.create_collection("c", 4).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_only_named_points() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        let a = record("a", 0, vec![1.0, 0.0], "en");
        let b = record("b", 0, vec![0.0, 1.0], "en");
        store.upsert("c", &[a.clone(), b.clone()]).await.unwrap();
        store.delete_vectors("c", &[a.id.clone()]).await.unwrap();
        assert!(store.ids_for_document("c", "a").await.is_empty());
        assert_eq!(store.ids_for_document("c", "b").await, vec![b.id]);
    }

    #[tokio::test]
    async fn missing_collection_reports_none() {
        let store = InMemoryVectorStore::new();
        assert!(store.collection_info("nope").await.unwrap().is_none());
        assert!(store
            .search("nope", &[1.0], 1, 0.0, &VectorFilter::default())
            .await
            .is_err());
    }
}
