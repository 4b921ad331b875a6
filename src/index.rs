//! Index manager: discovery, change detection, chunking, embedding, and
//! vector-store writes, with the registry kept in lockstep.
//!
//! # Single document
//!
//! ```text
//! read (size-checked) → sha256 → unchanged? return entry
//!   → detect kind → chunk → embed batch
//!   → delete previous vectors → upsert new vectors → write registry entry
//! ```
//!
//! An update is always delete-then-write. After every successful index,
//! update, or delete, an entry's `vector_ids` is exactly the set of points
//! the store holds for that document. When a write fails after the old
//! vectors are gone, the entry is rewritten with `status = error` and no
//! vector ids, so it never names points that do not exist.
//!
//! # Concurrency
//!
//! Files in a batch run on up to `index.workers` tasks. Writes to the same
//! path are serialized through a per-path async mutex. Every mutation takes
//! the shared side of the maintenance lock; a full rebuild takes it
//! exclusively. Cancellation is checked between files and, inside the
//! embedder, between sub-batches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::config::{ChunkingConfig, IndexConfig};
use crate::detect::detect;
use crate::discovery::discover;
use crate::embedding::ProviderManager;
use crate::error::{IndexError, Result};
use crate::models::{
    document_id_for, DocumentIndexEntry, DocumentInput, DocumentKind, IndexStatus,
    PayloadMetadata, VectorRecord,
};
use crate::progress::{IndexProgress, ProgressReporter};
use crate::registry::Registry;
use crate::store::VectorStore;

/// One failed file in a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub path: String,
    pub error: String,
    /// [`IndexError::kind`] of the failure.
    pub kind: &'static str,
    /// The provider, vector store or registry failed, not the file itself.
    #[serde(skip)]
    pub backend: bool,
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexRunResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Successful files whose content hash matched and were skipped.
    pub unchanged: usize,
    pub errors: Vec<IndexFailure>,
    /// The run observed its cancellation token; files not yet started were
    /// left alone.
    pub cancelled: bool,
}

/// What happened to one document.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub entry: DocumentIndexEntry,
    /// Content hash matched under incremental mode; nothing was re-embedded.
    pub unchanged: bool,
    /// Chunker fallbacks.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutdatedReason {
    /// Source changed on disk since it was last indexed.
    Modified,
    /// Source no longer exists; the entry is now in `error`.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutdatedDocument {
    pub path: String,
    pub reason: OutdatedReason,
}

/// Orchestrates indexing against one vector store and registry.
pub struct IndexManager {
    config: IndexConfig,
    chunker: Chunker,
    embedder: Arc<ProviderManager>,
    store: Arc<dyn VectorStore>,
    registry: Registry,
    /// Active collection id, shared with the search engine.
    collection: Arc<RwLock<String>>,
    maintenance: RwLock<()>,
    path_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn system_time_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Registry key and payload `source` for a path.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl IndexManager {
    pub fn new(
        config: &IndexConfig,
        chunking: &ChunkingConfig,
        embedder: Arc<ProviderManager>,
        store: Arc<dyn VectorStore>,
        registry: Registry,
        collection: Arc<RwLock<String>>,
    ) -> Self {
        Self {
            config: config.clone(),
            chunker: Chunker::new(chunking),
            embedder,
            store,
            registry,
            collection,
            maintenance: RwLock::new(()),
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn active_collection(&self) -> String {
        self.collection.read().await.clone()
    }

    /// Index one file into the active collection.
    pub async fn index_document(&self, path: &Path) -> Result<DocumentOutcome> {
        let _maintenance = self.maintenance.read().await;
        let collection = self.active_collection().await;
        self.index_into(&collection, path, self.config.incremental, None)
            .await
    }

    /// Index `paths`, or everything discovered under the base paths when
    /// `paths` is `None`. Per-file failures are collected, not raised.
    pub async fn index_documents(
        &self,
        paths: Option<&[PathBuf]>,
        progress: Option<&dyn ProgressReporter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IndexRunResult> {
        let _maintenance = self.maintenance.read().await;
        let files = match paths {
            Some(p) => p.to_vec(),
            None => discover(&self.config)?,
        };
        let collection = self.active_collection().await;
        let result = self
            .run_batch(&collection, files, self.config.incremental, progress, cancel)
            .await;
        self.registry.touch(now_secs()).await?;
        Ok(result)
    }

    /// Remove a document's vectors, then its entry. Unknown paths are a no-op.
    pub async fn delete_document(&self, path: &Path) -> Result<()> {
        let _maintenance = self.maintenance.read().await;
        let collection = self.active_collection().await;
        let key = path_key(path);
        let lock = self.path_lock(&key).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.delete_locked(&collection, &key).await
        };
        self.release_path_lock(&key, lock).await;
        outcome
    }

    async fn delete_locked(&self, collection: &str, key: &str) -> Result<()> {
        let Some(entry) = self.registry.get(collection, key).await? else {
            debug!(path = %key, "delete of unindexed document ignored");
            return Ok(());
        };
        self.store
            .delete_vectors(collection, &entry.vector_ids)
            .await?;
        self.registry.remove(collection, key).await?;
        self.registry.touch(now_secs()).await?;
        info!(path = %key, vectors = entry.vector_ids.len(), "deleted document");
        Ok(())
    }

    /// Entries whose source changed since indexing (marked `outdated`) or
    /// vanished (marked `error`).
    pub async fn find_outdated_documents(&self) -> Result<Vec<OutdatedDocument>> {
        let _maintenance = self.maintenance.read().await;
        let collection = self.active_collection().await;
        let mut outdated = Vec::new();

        for entry in self.registry.list(&collection).await? {
            match tokio::fs::metadata(&entry.path).await {
                Err(_) => {
                    if entry.status != IndexStatus::Error
                        || entry.error.as_deref() != Some("source file missing")
                    {
                        self.registry
                            .set_status(
                                &collection,
                                &entry.path,
                                IndexStatus::Error,
                                Some("source file missing"),
                            )
                            .await?;
                    }
                    outdated.push(OutdatedDocument {
                        path: entry.path,
                        reason: OutdatedReason::Missing,
                    });
                }
                Ok(meta) => {
                    let modified = meta.modified().map(system_time_secs).unwrap_or(0);
                    if modified > entry.indexed_at {
                        if entry.status == IndexStatus::Indexed {
                            self.registry
                                .set_status(&collection, &entry.path, IndexStatus::Outdated, None)
                                .await?;
                        }
                        outdated.push(OutdatedDocument {
                            path: entry.path,
                            reason: OutdatedReason::Modified,
                        });
                    }
                }
            }
        }
        Ok(outdated)
    }

    /// Re-run discovery and indexing.
    ///
    /// `full = false` indexes incrementally into the live collection and
    /// restores the metadata snapshot if the run fails. `full = true` fills a
    /// shadow collection from scratch and switches to it only once every
    /// file was processed without a backend failure.
    pub async fn rebuild(
        &self,
        full: bool,
        progress: Option<&dyn ProgressReporter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IndexRunResult> {
        if full {
            let _maintenance = self.maintenance.write().await;
            self.rebuild_shadow(progress, cancel).await
        } else {
            let _maintenance = self.maintenance.read().await;
            self.rebuild_in_place(progress, cancel).await
        }
    }

    async fn rebuild_in_place(
        &self,
        progress: Option<&dyn ProgressReporter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IndexRunResult> {
        let snapshot = self.registry.metadata().await?;
        let collection = self.active_collection().await;

        let outcome = match discover(&self.config) {
            Ok(files) => {
                let result = self
                    .run_batch(&collection, files, true, progress, cancel)
                    .await;
                if result.cancelled {
                    Err(IndexError::Cancelled)
                } else {
                    Ok(result)
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                self.registry.mark_rebuilt(now_secs()).await?;
                info!(
                    collection = %collection,
                    successful = result.successful,
                    failed = result.failed,
                    "incremental rebuild complete"
                );
                Ok(result)
            }
            Err(e) => {
                if let Some(snapshot) = &snapshot {
                    self.registry.restore_metadata(snapshot).await?;
                }
                warn!(error = %e, "incremental rebuild failed, metadata restored");
                Err(e)
            }
        }
    }

    async fn rebuild_shadow(
        &self,
        progress: Option<&dyn ProgressReporter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<IndexRunResult> {
        let old = self.active_collection().await;
        let shadow = format!("{}-{}", self.config.collection, Uuid::new_v4().simple());
        let files = discover(&self.config)?;

        self.store
            .create_collection(&shadow, self.embedder.dimensions())
            .await?;
        info!(from = %old, to = %shadow, files = files.len(), "full rebuild into shadow collection");

        let result = self.run_batch(&shadow, files, false, progress, cancel).await;

        let abort = if result.cancelled {
            Some(IndexError::Cancelled)
        } else if let Some(f) = result.errors.iter().find(|f| f.backend) {
            Some(IndexError::RebuildAborted(format!(
                "{} failed: {}",
                f.path, f.error
            )))
        } else {
            None
        };

        if let Some(err) = abort {
            self.drop_shadow(&shadow).await;
            warn!(error = %err, "full rebuild abandoned, live index untouched");
            return Err(err);
        }

        if let Err(e) = self.registry.swap_collection(&old, &shadow, now_secs()).await {
            self.drop_shadow(&shadow).await;
            return Err(e);
        }
        *self.collection.write().await = shadow.clone();

        if let Err(e) = self.store.delete_collection(&old).await {
            warn!(collection = %old, error = %e, "failed to delete previous collection");
        }
        info!(collection = %shadow, successful = result.successful, "full rebuild complete");
        Ok(result)
    }

    async fn drop_shadow(&self, shadow: &str) {
        if let Err(e) = self.store.delete_collection(shadow).await {
            warn!(collection = %shadow, error = %e, "failed to delete shadow collection");
        }
        if let Err(e) = self.registry.clear(shadow).await {
            warn!(collection = %shadow, error = %e, "failed to clear shadow registry rows");
        }
    }

    async fn run_batch(
        &self,
        collection: &str,
        files: Vec<PathBuf>,
        incremental: bool,
        progress: Option<&dyn ProgressReporter>,
        cancel: Option<&CancellationToken>,
    ) -> IndexRunResult {
        let total = files.len();
        let started = Instant::now();
        let mut result = IndexRunResult {
            total,
            ..Default::default()
        };

        let mut outcomes = stream::iter(files)
            .map(|path| async move {
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    return (path, Err(IndexError::Cancelled));
                }
                let outcome = self.index_into(collection, &path, incremental, cancel).await;
                (path, outcome)
            })
            .buffer_unordered(self.config.workers.max(1));

        // Counters are only touched here, one outcome at a time.
        let mut processed = 0;
        while let Some((path, outcome)) = outcomes.next().await {
            let key = path_key(&path);
            match outcome {
                Ok(doc) => {
                    result.successful += 1;
                    if doc.unchanged {
                        result.unchanged += 1;
                    }
                }
                Err(IndexError::Cancelled) => {
                    result.cancelled = true;
                    continue;
                }
                Err(e) => {
                    warn!(path = %key, error = %e, "failed to index document");
                    self.record_failure(collection, &path, &e).await;
                    result.failed += 1;
                    result.errors.push(IndexFailure {
                        path: key.clone(),
                        error: e.to_string(),
                        kind: e.kind(),
                        backend: e.is_backend(),
                    });
                }
            }

            processed += 1;
            if let Some(reporter) = progress {
                reporter.report(&IndexProgress {
                    total,
                    processed,
                    successful: result.successful,
                    failed: result.failed,
                    current_file: key,
                    estimated_remaining: IndexProgress::estimate(
                        started.elapsed(),
                        processed,
                        total,
                    ),
                });
            }
        }

        info!(
            collection,
            total,
            successful = result.successful,
            unchanged = result.unchanged,
            failed = result.failed,
            cancelled = result.cancelled,
            "batch indexing finished"
        );
        result
    }

    /// Mark a failed file in the registry without touching its vectors.
    async fn record_failure(&self, collection: &str, path: &Path, err: &IndexError) {
        let key = path_key(path);
        let message = err.to_string();
        let recorded = match self.registry.get(collection, &key).await {
            Ok(Some(_)) => {
                self.registry
                    .set_status(collection, &key, IndexStatus::Error, Some(&message))
                    .await
            }
            Ok(None) => {
                let now = now_secs();
                let entry = DocumentIndexEntry {
                    document_id: document_id_for(&key),
                    path: key.clone(),
                    content_hash: String::new(),
                    modified_at: 0,
                    indexed_at: now,
                    chunk_count: 0,
                    vector_ids: Vec::new(),
                    size_bytes: 0,
                    degraded_chunks: 0,
                    status: IndexStatus::Error,
                    error: Some(message),
                };
                self.registry.upsert(collection, &entry).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            warn!(path = %key, error = %e, "failed to record index failure");
        }
    }

    async fn path_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drop the map's lock for `key` once no other task holds or awaits it.
    async fn release_path_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.path_locks.lock().await;
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    async fn tracked_path_locks(&self) -> usize {
        self.path_locks.lock().await.len()
    }

    async fn index_into(
        &self,
        collection: &str,
        path: &Path,
        incremental: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<DocumentOutcome> {
        let key = path_key(path);
        let lock = self.path_lock(&key).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.index_locked(collection, path, &key, incremental, cancel)
                .await
        };
        self.release_path_lock(&key, lock).await;
        outcome
    }

    async fn index_locked(
        &self,
        collection: &str,
        path: &Path,
        key: &str,
        incremental: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<DocumentOutcome> {
        let key = key.to_string();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| IndexError::fs(path, e.to_string()))?;
        if !meta.is_file() {
            return Err(IndexError::fs(path, "not a regular file"));
        }
        if meta.len() > self.config.max_file_size {
            return Err(IndexError::fs(
                path,
                format!(
                    "file is {} bytes, limit is {}",
                    meta.len(),
                    self.config.max_file_size
                ),
            ));
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IndexError::fs(path, e.to_string()))?;
        let hash = content_hash(&bytes);
        let content =
            String::from_utf8(bytes).map_err(|_| IndexError::fs(path, "not valid UTF-8 text"))?;

        let existing = self.registry.get(collection, &key).await?;
        if incremental {
            if let Some(entry) = &existing {
                // Documents with unembedded chunks are retried on every run.
                if entry.status == IndexStatus::Indexed
                    && entry.content_hash == hash
                    && entry.degraded_chunks == 0
                {
                    debug!(path = %key, "content unchanged, skipping");
                    return Ok(DocumentOutcome {
                        entry: entry.clone(),
                        unchanged: true,
                        warnings: Vec::new(),
                    });
                }
            }
        }

        let document_id = document_id_for(&key);
        let (kind, language) = detect(Some(path), &content);
        let output = self.chunker.chunk(&DocumentInput {
            document_id: document_id.clone(),
            content,
            source_path: Some(path.to_path_buf()),
            language: language.clone(),
            kind,
        });
        let chunks = output.chunks;

        // Empty chunks are never sent to the provider.
        let embeddable: Vec<usize> = (0..chunks.len())
            .filter(|&i| !chunks[i].text.trim().is_empty())
            .collect();
        let texts: Vec<String> = embeddable.iter().map(|&i| chunks[i].text.clone()).collect();
        let batch = self.embedder.embed_batch(&texts, cancel).await?;
        let degraded = batch.degraded.len();
        if !embeddable.is_empty() && batch.vectors.iter().all(Option::is_none) {
            // Previous vectors stay; the entry is marked failed by the caller.
            return Err(IndexError::provider(
                "manager",
                format!("none of {} chunks could be embedded", embeddable.len()),
                true,
            ));
        }
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        for (slot, vector) in embeddable.iter().zip(batch.vectors) {
            vectors[*slot] = vector;
        }

        let payload = PayloadMetadata {
            source: key.clone(),
            document_id: document_id.clone(),
            kind,
            category: kind.category().to_string(),
            language,
            file_type: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase()),
            size: meta.len(),
            modified: meta.modified().map(system_time_secs).unwrap_or(0),
            tags: document_tags(kind, &chunks),
        };

        let mut records = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            if let Some(vector) = vector {
                records.push(VectorRecord::new(chunk, vector, payload.clone())?);
            }
        }
        let vector_ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        if let Some(previous) = &existing {
            if !previous.vector_ids.is_empty() {
                self.store
                    .delete_vectors(collection, &previous.vector_ids)
                    .await?;
            }
        }

        if let Err(e) = self.store.upsert(collection, &records).await {
            // Old vectors are gone and new ones may be partially written.
            if let Err(cleanup) = self.store.delete_vectors(collection, &vector_ids).await {
                warn!(path = %key, error = %cleanup, "failed to clean up partial write");
            }
            let failed = failed_entry(&document_id, &key, &payload, &e);
            self.registry.upsert(collection, &failed).await?;
            return Err(e);
        }

        let entry = DocumentIndexEntry {
            document_id,
            path: key.clone(),
            content_hash: hash,
            modified_at: payload.modified,
            indexed_at: now_secs(),
            chunk_count: chunks.len(),
            vector_ids,
            size_bytes: payload.size,
            degraded_chunks: degraded,
            status: IndexStatus::Indexed,
            error: None,
        };
        if let Err(e) = self.registry.upsert(collection, &entry).await {
            // The new vectors would be untracked; take them back out.
            if let Err(cleanup) = self.store.delete_vectors(collection, &entry.vector_ids).await {
                warn!(path = %key, error = %cleanup, "failed to remove untracked vectors");
            }
            let failed = failed_entry(&entry.document_id, &key, &payload, &e);
            if let Err(again) = self.registry.upsert(collection, &failed).await {
                warn!(path = %key, error = %again, "failed to record registry failure");
            }
            return Err(e);
        }

        for warning in &output.warnings {
            debug!(path = %key, warning = %warning, "chunker fallback");
        }
        debug!(
            path = %key,
            kind = %kind,
            chunks = entry.chunk_count,
            vectors = entry.vector_ids.len(),
            degraded,
            "indexed document"
        );
        Ok(DocumentOutcome {
            entry,
            unchanged: false,
            warnings: output.warnings,
        })
    }
}

/// Entry for a document whose old vectors are gone and new ones were not kept.
fn failed_entry(
    document_id: &str,
    key: &str,
    payload: &PayloadMetadata,
    err: &IndexError,
) -> DocumentIndexEntry {
    DocumentIndexEntry {
        document_id: document_id.to_string(),
        path: key.to_string(),
        content_hash: String::new(),
        modified_at: payload.modified,
        indexed_at: now_secs(),
        chunk_count: 0,
        vector_ids: Vec::new(),
        size_bytes: payload.size,
        degraded_chunks: 0,
        status: IndexStatus::Error,
        error: Some(err.to_string()),
    }
}

/// Issue and pull-request labels become payload tags.
fn document_tags(kind: DocumentKind, chunks: &[crate::models::Chunk]) -> Vec<String> {
    match kind {
        DocumentKind::Issue | DocumentKind::PullRequest => chunks
            .first()
            .map(|c| {
                c.metadata
                    .labels
                    .iter()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        DocumentKind::Code | DocumentKind::Markdown | DocumentKind::PlainText => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::config::EmbeddingConfig;
    use crate::embedding::EmbeddingProvider;
    use crate::store::{CollectionInfo, InMemoryVectorStore, ScoredPoint, VectorFilter};

    struct Lengths;

    #[async_trait]
    impl EmbeddingProvider for Lengths {
        fn name(&self) -> &str {
            "lengths"
        }
        fn model(&self) -> &str {
            "test"
        }
        fn dimensions(&self) -> usize {
            3
        }
        fn max_tokens(&self) -> usize {
            512
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.0])
                .collect())
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    /// Loses the registry right after a vector write lands.
    struct RegistryDiesOnUpsert {
        inner: InMemoryVectorStore,
        registry: Registry,
    }

    #[async_trait]
    impl VectorStore for RegistryDiesOnUpsert {
        fn backend(&self) -> &str {
            "memory"
        }
        async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
            self.inner.create_collection(collection, dims).await
        }
        async fn delete_collection(&self, collection: &str) -> Result<()> {
            self.inner.delete_collection(collection).await
        }
        async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
            self.inner.upsert(collection, records).await?;
            self.registry.close().await;
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
            self.inner
                .search(collection, vector, limit, threshold, filter)
                .await
        }
        async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
            self.inner.delete_vectors(collection, ids).await
        }
        async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
            self.inner.collection_info(collection).await
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    async fn manager(store: Arc<dyn VectorStore>, registry: Registry) -> IndexManager {
        let config: IndexConfig = toml::from_str("registry_path = \"unused.sqlite\"").unwrap();
        let embedding = EmbeddingConfig {
            retry_base_ms: 1,
            ..Default::default()
        };
        let embedder = ProviderManager::with_providers(
            vec![Arc::new(Lengths) as Arc<dyn EmbeddingProvider>],
            &embedding,
        )
        .unwrap();
        store.create_collection("test", 3).await.unwrap();
        IndexManager::new(
            &config,
            &ChunkingConfig::default(),
            Arc::new(embedder),
            store,
            registry,
            Arc::new(RwLock::new("test".to_string())),
        )
    }

    #[tokio::test]
    async fn path_locks_are_released_after_use() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, "alpha").unwrap();
        std::fs::write(&b, "beta").unwrap();

        let registry = Registry::open_in_memory().await.unwrap();
        let m = manager(Arc::new(InMemoryVectorStore::new()), registry).await;

        m.index_document(&a).await.unwrap();
        let (x, y) = tokio::join!(m.index_document(&b), m.index_document(&b));
        x.unwrap();
        y.unwrap();
        m.delete_document(&a).await.unwrap();
        m.delete_document(&tmp.path().join("never-indexed.txt"))
            .await
            .unwrap();

        assert_eq!(m.tracked_path_locks().await, 0);
    }

    #[tokio::test]
    async fn registry_failure_after_write_removes_new_vectors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "first paragraph\n\nsecond paragraph").unwrap();

        let registry = Registry::open_in_memory().await.unwrap();
        let store = Arc::new(RegistryDiesOnUpsert {
            inner: InMemoryVectorStore::new(),
            registry: registry.clone(),
        });
        let m = manager(store.clone(), registry).await;

        let err = m.index_document(&path).await.unwrap_err();
        assert_eq!(err.kind(), "registry");
        assert!(err.is_backend());

        let info = store.inner.collection_info("test").await.unwrap().unwrap();
        assert_eq!(info.count, 0, "untracked vectors left behind");
        assert_eq!(m.tracked_path_locks().await, 0);
    }
}
