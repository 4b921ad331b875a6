//! Vector-store abstraction.
//!
//! The [`VectorStore`] trait covers collection lifecycle, idempotent upsert,
//! filtered similarity search, and deletion, so the indexer and search
//! engine can run against any backend:
//!
//! | Backend | Module |
//! |---------|--------|
//! | in-process, brute-force cosine | [`memory`] |
//! | Qdrant REST API | [`qdrant`] |
//!
//! Implementations must be `Send + Sync`. Transient failures are reported
//! with `transient: true` so callers can retry; everything else (missing
//! collection, dimension mismatch) is surfaced as-is.

pub mod memory;
pub mod qdrant;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::VectorStoreConfig;
use crate::error::{IndexError, Result};
use crate::models::{VectorPayload, VectorRecord};

pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantStore;

/// A search hit.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    pub payload: VectorPayload,
}

/// Health of a collection as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    /// Ready for reads and writes.
    Green,
    /// Optimizing; usable.
    Yellow,
    /// Failed.
    Red,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub count: usize,
    pub dims: usize,
    pub status: CollectionStatus,
}

/// One filter clause over a payload field. Field names are dotted paths
/// into the payload (`metadata.category`, `metadata.tags`).
///
/// When the field holds an array, `Equals` and `AnyOf` match if any
/// element matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals { field: String, value: Value },
    AnyOf { field: String, values: Vec<Value> },
    Range {
        field: String,
        gte: Option<f64>,
        lte: Option<f64>,
    },
}

/// AND-combination of conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorFilter {
    pub conditions: Vec<Condition>,
}

impl VectorFilter {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn equals(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Equals {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn any_of(mut self, field: &str, values: Vec<Value>) -> Self {
        self.conditions.push(Condition::AnyOf {
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn range(mut self, field: &str, gte: Option<f64>, lte: Option<f64>) -> Self {
        self.conditions.push(Condition::Range {
            field: field.to_string(),
            gte,
            lte,
        });
        self
    }

    /// Evaluate against a payload rendered as JSON.
    pub fn matches(&self, payload: &Value) -> bool {
        self.conditions.iter().all(|c| condition_matches(c, payload))
    }
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |v, key| v.get(key))
}

fn condition_matches(condition: &Condition, payload: &Value) -> bool {
    match condition {
        Condition::Equals { field, value } => match lookup(payload, field) {
            Some(Value::Array(items)) => items.contains(value),
            Some(v) => v == value,
            None => false,
        },
        Condition::AnyOf { field, values } => match lookup(payload, field) {
            Some(Value::Array(items)) => items.iter().any(|i| values.contains(i)),
            Some(v) => values.contains(v),
            None => false,
        },
        Condition::Range { field, gte, lte } => {
            let Some(n) = lookup(payload, field).and_then(Value::as_f64) else {
                return false;
            };
            gte.map_or(true, |g| n >= g) && lte.map_or(true, |l| n <= l)
        }
    }
}

/// Abstract vector backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection`](VectorStore::create_collection) | Create a collection (no-op if it exists with the same dims) |
/// | [`delete_collection`](VectorStore::delete_collection) | Drop a collection and its points |
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite points by id |
/// | [`search`](VectorStore::search) | Filtered cosine search above a threshold |
/// | [`delete_vectors`](VectorStore::delete_vectors) | Remove points by id |
/// | [`collection_info`](VectorStore::collection_info) | Point count, dims, status |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs and errors.
    fn backend(&self) -> &str;

    /// Create `collection` for vectors of `dims`. Existing collections with
    /// the same dims are left alone; a different dims is a non-transient
    /// error.
    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()>;

    async fn delete_collection(&self, collection: &str) -> Result<()>;

    /// Write points. Re-upserting an id overwrites it.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

    /// Up to `limit` hits with score at least `threshold`, best first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        threshold: f32,
        filter: &VectorFilter,
    ) -> Result<Vec<ScoredPoint>>;

    /// Remove points. Unknown ids are ignored.
    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// `None` when the collection does not exist.
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>>;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;
}

/// Checks shared by every backend before a write leaves the process.
pub(crate) fn validate_records(backend: &str, dims: usize, records: &[VectorRecord]) -> Result<()> {
    for r in records {
        if r.vector.len() != dims {
            return Err(IndexError::store(
                backend,
                format!(
                    "dimension mismatch for point {}: expected {}, got {}",
                    r.id,
                    dims,
                    r.vector.len()
                ),
                false,
            ));
        }
        r.payload.metadata.validate()?;
    }
    Ok(())
}

/// Create the backend named by `[vector_store].backend`.
pub fn create_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        "qdrant" => Ok(Arc::new(QdrantStore::new(config)?)),
        other => Err(IndexError::Config(format!(
            "unknown vector store backend: {}",
            other
        ))),
    }
}
