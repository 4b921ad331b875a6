//! Qdrant vector store over gRPC via `qdrant-client`.
//!
//! Collections use cosine distance. Point ids are UUIDs (see
//! [`crate::models::vector_id_for`]); the whole [`VectorPayload`] is stored
//! as the Qdrant payload, so filters address fields like
//! `metadata.category` directly.
//!
//! Every call goes through [`with_backoff`]. `Unavailable`,
//! `DeadlineExceeded`, `ResourceExhausted` and `Aborted` responses are
//! retried; other failures are not.

use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CollectionStatus as QdrantCollectionStatus, Condition as QdrantCondition,
    CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId, PointStruct,
    PointsIdsList, Range, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::Value;
use tracing::debug;

use super::{
    validate_records, CollectionInfo, CollectionStatus, Condition, ScoredPoint, VectorFilter,
    VectorStore,
};
use crate::config::VectorStoreConfig;
use crate::error::{IndexError, Result};
use crate::models::{VectorPayload, VectorRecord};
use crate::retry::with_backoff;

const BACKEND: &str = "qdrant";

/// gRPC status codes worth retrying: aborted, deadline exceeded, resource
/// exhausted, unavailable.
const TRANSIENT_CODES: [i32; 4] = [10, 4, 8, 14];

/// A [`VectorStore`] backed by [Qdrant](https://qdrant.tech/).
pub struct QdrantStore {
    client: Qdrant,
    max_retries: u32,
    retry_base_ms: u64,
}

fn map_err(e: QdrantError) -> IndexError {
    let transient = match &e {
        QdrantError::ResponseError { status } => TRANSIENT_CODES.contains(&(status.code() as i32)),
        _ => false,
    };
    IndexError::store(BACKEND, e.to_string(), transient)
}

impl QdrantStore {
    /// # Errors
    ///
    /// [`IndexError::Config`] when `url` is missing, the API key variable is
    /// named but unset, or the client cannot be built.
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| IndexError::Config("vector_store.url required for qdrant".into()))?;

        let mut builder =
            Qdrant::from_url(url).timeout(Duration::from_secs(config.timeout_secs));
        if let Some(var) = &config.api_key_env {
            let key = std::env::var(var).map_err(|_| {
                IndexError::Config(format!("environment variable {} not set", var))
            })?;
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| IndexError::Config(format!("failed to build qdrant client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        })
    }

    async fn exists(&self, collection: &str) -> Result<bool> {
        with_backoff(self.max_retries, self.retry_base_ms, || async move {
            self.client.collection_exists(collection).await.map_err(map_err)
        })
        .await
    }
}

/// Translate a [`VectorFilter`] into a Qdrant filter of `must` clauses.
pub(crate) fn to_qdrant_filter(filter: &VectorFilter) -> Result<Option<Filter>> {
    if filter.is_empty() {
        return Ok(None);
    }
    let mut must = Vec::with_capacity(filter.conditions.len());
    for condition in &filter.conditions {
        must.push(match condition {
            Condition::Equals { field, value } => match value {
                Value::String(s) => QdrantCondition::matches(field.clone(), s.clone()),
                Value::Bool(b) => QdrantCondition::matches(field.clone(), *b),
                Value::Number(n) if n.is_i64() => {
                    QdrantCondition::matches(field.clone(), n.as_i64().unwrap_or_default())
                }
                other => return Err(unsupported(field, other)),
            },
            Condition::AnyOf { field, values } => {
                let keywords: Option<Vec<String>> = values
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect();
                if let Some(keywords) = keywords {
                    QdrantCondition::matches(field.clone(), keywords)
                } else {
                    let integers: Option<Vec<i64>> = values.iter().map(Value::as_i64).collect();
                    match integers {
                        Some(integers) => QdrantCondition::matches(field.clone(), integers),
                        None => return Err(unsupported(field, &Value::Array(values.clone()))),
                    }
                }
            }
            Condition::Range { field, gte, lte } => QdrantCondition::range(
                field.clone(),
                Range {
                    gte: *gte,
                    lte: *lte,
                    ..Default::default()
                },
            ),
        });
    }
    Ok(Some(Filter::must(must)))
}

fn unsupported(field: &str, value: &Value) -> IndexError {
    IndexError::InvalidInput(format!(
        "cannot filter '{}' on {} with the qdrant backend",
        field, value
    ))
}

fn collection_status(code: i32) -> CollectionStatus {
    match QdrantCollectionStatus::try_from(code) {
        Ok(QdrantCollectionStatus::Green) => CollectionStatus::Green,
        Ok(QdrantCollectionStatus::Yellow) | Ok(QdrantCollectionStatus::Grey) => {
            CollectionStatus::Yellow
        }
        _ => CollectionStatus::Red,
    }
}

fn point_id(id: Option<PointId>) -> String {
    match id.and_then(|p| p.point_id_options) {
        Some(PointIdOptions::Uuid(s)) => s,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
        if let Some(info) = self.collection_info(collection).await? {
            if info.dims != dims {
                return Err(IndexError::store(
                    BACKEND,
                    format!(
                        "collection '{}' has {} dimensions, requested {}",
                        collection, info.dims, dims
                    ),
                    false,
                ));
            }
            debug!(collection, "qdrant collection already exists, skipping creation");
            return Ok(());
        }

        with_backoff(self.max_retries, self.retry_base_ms, || async move {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(collection)
                        .vectors_config(VectorParamsBuilder::new(dims as u64, Distance::Cosine)),
                )
                .await
                .map_err(map_err)
        })
        .await?;
        debug!(collection, dims, "created qdrant collection");
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        if !self.exists(collection).await? {
            return Ok(());
        }
        with_backoff(self.max_retries, self.retry_base_ms, || async move {
            self.client
                .delete_collection(collection)
                .await
                .map_err(map_err)
        })
        .await?;
        debug!(collection, "deleted qdrant collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let info = self.collection_info(collection).await?.ok_or_else(|| {
            IndexError::store(
                BACKEND,
                format!("collection '{}' does not exist", collection),
                false,
            )
        })?;
        validate_records(BACKEND, info.dims, records)?;

        let mut points = Vec::with_capacity(records.len());
        for r in records {
            let json = serde_json::to_value(&r.payload)
                .map_err(|e| IndexError::InvalidPayload(e.to_string()))?;
            let payload =
                Payload::try_from(json).map_err(|e| IndexError::InvalidPayload(e.to_string()))?;
            points.push(PointStruct::new(r.id.clone(), r.vector.clone(), payload));
        }

        let points = &points;
        with_backoff(self.max_retries, self.retry_base_ms, || async move {
            self.client
                .upsert_points(UpsertPointsBuilder::new(collection, points.clone()).wait(true))
                .await
                .map_err(map_err)
        })
        .await?;
        debug!(collection, count = records.len(), "upserted points to qdrant");
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
        let filter = to_qdrant_filter(filter)?;
        let filter = &filter;

        let response = with_backoff(self.max_retries, self.retry_base_ms, || async move {
            let mut request = SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64)
                .score_threshold(threshold)
                .with_payload(true);
            if let Some(f) = filter {
                request = request.filter(f.clone());
            }
            self.client.search_points(request).await.map_err(map_err)
        })
        .await?;

        let mut out = Vec::with_capacity(response.result.len());
        for hit in response.result {
            if hit.payload.is_empty() {
                continue;
            }
            let json: serde_json::Map<String, Value> = hit
                .payload
                .into_iter()
                .map(|(k, v)| (k, v.into_json()))
                .collect();
            let payload: VectorPayload = serde_json::from_value(Value::Object(json)).map_err(|e| {
                IndexError::store(BACKEND, format!("unexpected payload: {}", e), false)
            })?;
            out.push(ScoredPoint {
                id: point_id(hit.id),
                score: hit.score,
                payload,
            });
        }
        Ok(out)
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.clone())).collect();
        let point_ids = &point_ids;
        with_backoff(self.max_retries, self.retry_base_ms, || async move {
            self.client
                .delete_points(
                    DeletePointsBuilder::new(collection)
                        .points(PointsIdsList {
                            ids: point_ids.clone(),
                        })
                        .wait(true),
                )
                .await
                .map_err(map_err)
        })
        .await?;
        debug!(collection, count = ids.len(), "deleted points from qdrant");
        Ok(())
    }

    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        if !self.exists(collection).await? {
            return Ok(None);
        }
        let response = with_backoff(self.max_retries, self.retry_base_ms, || async move {
            self.client.collection_info(collection).await.map_err(map_err)
        })
        .await?;
        let Some(info) = response.result else {
            return Ok(None);
        };

        let dims = info
            .config
            .as_ref()
            .and_then(|c| c.params.as_ref())
            .and_then(|p| p.vectors_config.as_ref())
            .and_then(|v| v.config.as_ref())
            .map(|kind| match kind {
                VectorsConfigKind::Params(params) => params.size as usize,
                VectorsConfigKind::ParamsMap(_) => 0,
            })
            .unwrap_or(0);

        Ok(Some(CollectionInfo {
            count: info.points_count.unwrap_or(0) as usize,
            dims,
            status: collection_status(info.status),
        }))
    }

    async fn is_available(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}
