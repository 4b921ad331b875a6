//! The engine facade: the operations external callers invoke.
//!
//! | Operation | Delegates to |
//! |-----------|--------------|
//! | [`Engine::index_documents`] | [`IndexManager::index_documents`] |
//! | [`Engine::search`] | [`SearchEngine::search`] |
//! | [`Engine::delete_document`] | [`IndexManager::delete_document`] |
//! | [`Engine::get_stats`] | registry + store |
//! | [`Engine::health_check`] | provider probes, store, registry |
//! | [`Engine::rebuild`] | [`IndexManager::rebuild`] |
//! | [`Engine::find_outdated_documents`] | [`IndexManager::find_outdated_documents`] |
//!
//! Construction fails fast: no usable embedding provider, an unreachable
//! vector store, or a collection whose dimensionality disagrees with the
//! provider's are all errors at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{validate, Config};
use crate::embedding::ProviderManager;
use crate::error::{IndexError, Result};
use crate::index::{now_secs, DocumentOutcome, IndexManager, IndexRunResult, OutdatedDocument};
use crate::models::{IndexStatus, SearchQuery, SearchResult};
use crate::progress::ProgressReporter;
use crate::registry::Registry;
use crate::search::SearchEngine;
use crate::stats::{PerfCounters, Stats};
use crate::store::{create_store, CollectionStatus, VectorStore};

/// Tri-state health, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    fn with(status: HealthStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthComponents {
    pub embedding: ComponentHealth,
    pub vector_store: ComponentHealth,
    pub index_manager: ComponentHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst of the component statuses.
    pub status: HealthStatus,
    pub components: HealthComponents,
}

pub struct Engine {
    embedder: Arc<ProviderManager>,
    store: Arc<dyn VectorStore>,
    registry: Registry,
    collection: Arc<RwLock<String>>,
    index: IndexManager,
    search: SearchEngine,
    perf: PerfCounters,
}

impl Engine {
    /// Build every component from configuration and initialise the index.
    pub async fn new(config: Config) -> Result<Self> {
        validate(&config).map_err(|e| IndexError::Config(e.to_string()))?;
        let embedder = ProviderManager::new(&config.embedding)?;
        let store = create_store(&config.vector_store)?;
        let registry = Registry::open(&config.index.registry_path).await?;
        Self::with_components(config, embedder, store, registry).await
    }

    /// Assemble an engine from pre-built components.
    pub async fn with_components(
        config: Config,
        embedder: ProviderManager,
        store: Arc<dyn VectorStore>,
        registry: Registry,
    ) -> Result<Self> {
        if !embedder.has_providers() {
            return Err(IndexError::Config(
                "no embedding provider configured".into(),
            ));
        }
        let dims = embedder.dimensions();
        if let Some(declared) = config.embedding.primary.dims {
            if declared != dims {
                return Err(IndexError::Config(format!(
                    "embedding.dims is {} but the provider produces {}",
                    declared, dims
                )));
            }
        }
        if !embedder.is_available().await {
            return Err(IndexError::provider(
                "manager",
                "no embedding provider is reachable",
                false,
            ));
        }
        if !store.is_available().await {
            return Err(IndexError::store(
                store.backend(),
                "vector store is unreachable",
                false,
            ));
        }

        let collection = registry.init(&config.index.collection, now_secs()).await?;
        match store.collection_info(&collection).await? {
            Some(info) if info.dims != dims => {
                return Err(IndexError::Config(format!(
                    "collection '{}' has {} dimensions but the provider produces {}",
                    collection, info.dims, dims
                )));
            }
            Some(_) => {}
            None => {
                // Rows for a collection the store no longer has would name
                // vectors that do not exist.
                let stale = registry.list(&collection).await?.len();
                if stale > 0 {
                    warn!(collection = %collection, entries = stale, "collection missing from store, clearing registry entries");
                    registry.clear(&collection).await?;
                }
                store.create_collection(&collection, dims).await?;
            }
        }
        info!(collection = %collection, dims, backend = store.backend(), "engine ready");

        let embedder = Arc::new(embedder);
        let collection = Arc::new(RwLock::new(collection));
        let index = IndexManager::new(
            &config.index,
            &config.chunking,
            Arc::clone(&embedder),
            Arc::clone(&store),
            registry.clone(),
            Arc::clone(&collection),
        );
        let search = SearchEngine::new(
            &config.retrieval,
            Arc::clone(&embedder),
            Arc::clone(&store),
            Arc::clone(&collection),
        );

        Ok(Self {
            embedder,
            store,
            registry,
            collection,
            index,
            search,
            perf: PerfCounters::default(),
        })
    }

    pub async fn collection(&self) -> String {
        self.collection.read().await.clone()
    }

    pub async fn index_documents(
        &self,
        paths: Option<&[PathBuf]>,
        progress: Option<&dyn ProgressReporter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IndexRunResult> {
        let started = Instant::now();
        let result = self.index.index_documents(paths, progress, cancel).await?;
        self.perf
            .record_index((result.successful - result.unchanged) as u64, started.elapsed());
        Ok(result)
    }

    /// Index a single file, raising its error instead of collecting it.
    pub async fn index_document(&self, path: &Path) -> Result<DocumentOutcome> {
        let started = Instant::now();
        let outcome = self.index.index_document(path).await?;
        if !outcome.unchanged {
            self.perf.record_index(1, started.elapsed());
        }
        Ok(outcome)
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let results = self.search.search(query).await?;
        self.perf.record_search(started.elapsed());
        Ok(results)
    }

    pub async fn delete_document(&self, path: &Path) -> Result<()> {
        self.index.delete_document(path).await
    }

    pub async fn rebuild(
        &self,
        full: bool,
        progress: Option<&dyn ProgressReporter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IndexRunResult> {
        let started = Instant::now();
        let result = self.index.rebuild(full, progress, cancel).await?;
        self.perf
            .record_index((result.successful - result.unchanged) as u64, started.elapsed());
        Ok(result)
    }

    pub async fn find_outdated_documents(&self) -> Result<Vec<OutdatedDocument>> {
        self.index.find_outdated_documents().await
    }

    pub async fn get_stats(&self) -> Result<Stats> {
        let collection = self.collection().await;
        let entries = self.registry.list(&collection).await?;
        let meta = self.registry.metadata().await?;
        let vectors = self
            .store
            .collection_info(&collection)
            .await?
            .map(|i| i.count)
            .unwrap_or(0);

        Ok(Stats {
            documents: meta.as_ref().map_or(0, |m| m.documents),
            chunks: meta.as_ref().map_or(0, |m| m.chunks),
            tracked_vectors: meta.as_ref().map_or(0, |m| m.vectors),
            index_size: meta.as_ref().map_or(0, |m| m.size_bytes),
            updated_at: meta.as_ref().map(|m| m.updated_at),
            last_rebuild_at: meta.as_ref().and_then(|m| m.last_rebuild_at),
            vectors,
            degraded_chunks: entries.iter().map(|e| e.degraded_chunks).sum(),
            error_documents: entries
                .iter()
                .filter(|e| e.status == IndexStatus::Error)
                .count(),
            collection,
            performance: self.perf.snapshot(),
        })
    }

    pub async fn health_check(&self) -> HealthReport {
        let embedding = self.embedding_health().await;
        let vector_store = self.store_health().await;
        let index_manager = self.registry_health().await;
        let status = embedding
            .status
            .max(vector_store.status)
            .max(index_manager.status);
        HealthReport {
            status,
            components: HealthComponents {
                embedding,
                vector_store,
                index_manager,
            },
        }
    }

    async fn embedding_health(&self) -> ComponentHealth {
        let probes = self.embedder.probe().await;
        let down: Vec<&str> = probes
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name.as_str())
            .collect();
        if down.is_empty() {
            ComponentHealth::healthy()
        } else if down.len() < probes.len() {
            ComponentHealth::with(
                HealthStatus::Degraded,
                format!("unavailable: {}", down.join(", ")),
            )
        } else {
            ComponentHealth::with(HealthStatus::Error, "no embedding provider is reachable")
        }
    }

    async fn store_health(&self) -> ComponentHealth {
        if !self.store.is_available().await {
            return ComponentHealth::with(HealthStatus::Error, "vector store is unreachable");
        }
        let collection = self.collection().await;
        match self.store.collection_info(&collection).await {
            Ok(Some(info)) => match info.status {
                CollectionStatus::Green => ComponentHealth::healthy(),
                CollectionStatus::Yellow => {
                    ComponentHealth::with(HealthStatus::Degraded, "collection is optimizing")
                }
                CollectionStatus::Red => {
                    ComponentHealth::with(HealthStatus::Error, "collection reports failure")
                }
            },
            Ok(None) => ComponentHealth::with(
                HealthStatus::Error,
                format!("collection '{}' is missing", collection),
            ),
            Err(e) => ComponentHealth::with(HealthStatus::Error, e.to_string()),
        }
    }

    async fn registry_health(&self) -> ComponentHealth {
        if let Err(e) = self.registry.ping().await {
            return ComponentHealth::with(HealthStatus::Error, e.to_string());
        }
        let collection = self.collection().await;
        match self.registry.list(&collection).await {
            Ok(entries) => {
                let errors = entries
                    .iter()
                    .filter(|e| e.status == IndexStatus::Error)
                    .count();
                let degraded: usize = entries.iter().map(|e| e.degraded_chunks).sum();
                if errors > 0 {
                    ComponentHealth::with(
                        HealthStatus::Degraded,
                        format!("{} documents in error", errors),
                    )
                } else if degraded > 0 {
                    ComponentHealth::with(
                        HealthStatus::Degraded,
                        format!("{} chunks have no embedding", degraded),
                    )
                } else {
                    ComponentHealth::healthy()
                }
            }
            Err(e) => ComponentHealth::with(HealthStatus::Error, e.to_string()),
        }
    }
}
