//! Batching, retries, failover, and degradation over a set of providers.
//!
//! A batch is cut into `batch_size` sub-batches that run concurrently, bounded
//! by a semaphore of `concurrency` permits. Each sub-batch goes to the
//! preferred provider not in cooldown, with per-call timeout and backoff. A
//! provider that exhausts its retries is cooled down and the next candidate is
//! tried. A sub-batch that fails everywhere is retried item by item; items
//! that still fail are degraded according to [`EmbedFailurePolicy`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{check_vectors, create_provider, EmbeddingProvider};
use crate::chunk::text::CHARS_PER_TOKEN;
use crate::config::{EmbedFailurePolicy, EmbeddingConfig, ProviderPreference};
use crate::error::{IndexError, Result};
use crate::retry::{with_backoff, with_timeout};

/// Result of embedding a batch. `vectors[i]` is `None` when item `i` was
/// skipped; `degraded` lists every index that did not get a real embedding,
/// whether skipped or zero-filled.
#[derive(Debug, Clone, Default)]
pub struct EmbedBatchOutcome {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub degraded: Vec<usize>,
}

struct Slot {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    /// Epoch millis until which this provider is skipped.
    unavailable_until: AtomicU64,
}

impl Slot {
    fn cooling_down(&self) -> bool {
        self.unavailable_until.load(Ordering::Relaxed) > now_ms()
    }

    fn cool_down(&self, period: Duration) {
        let until = now_ms().saturating_add(period.as_millis() as u64);
        self.unavailable_until.store(until, Ordering::Relaxed);
    }

    fn recover(&self) {
        self.unavailable_until.store(0, Ordering::Relaxed);
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Rank of a provider family under a preference; lower is better.
/// Unknown families share the middle rank and keep configuration order.
fn preference_rank(name: &str, preference: ProviderPreference) -> u8 {
    match (preference, name) {
        (ProviderPreference::Cost, "local") => 0,
        (ProviderPreference::Cost, "ollama") => 0,
        (ProviderPreference::Cost, "openai") => 2,
        (ProviderPreference::Latency, "local") => 0,
        (ProviderPreference::Latency, "ollama") => 1,
        (ProviderPreference::Latency, "openai") => 2,
        (ProviderPreference::Quality, "openai") => 0,
        (ProviderPreference::Quality, "ollama") => 1,
        (ProviderPreference::Quality, "local") => 2,
        _ => 1,
    }
}

/// Selects among providers and turns batches of text into vectors.
pub struct ProviderManager {
    slots: Vec<Slot>,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    retry_base_ms: u64,
    cooldown: Duration,
    policy: EmbedFailurePolicy,
    permits: Arc<Semaphore>,
}

impl ProviderManager {
    /// Build providers for the primary entry and every fallback.
    /// Disabled entries are ignored.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let mut providers = Vec::new();
        for entry in std::iter::once(&config.primary).chain(&config.fallbacks) {
            if !entry.is_enabled() {
                continue;
            }
            let provider = create_provider(entry)?;
            providers.push((provider, Duration::from_secs(entry.timeout_secs)));
        }
        Self::from_parts(providers, config)
    }

    /// Use already-constructed providers, in configuration order. Every
    /// provider gets the primary entry's timeout.
    pub fn with_providers(
        providers: Vec<Arc<dyn EmbeddingProvider>>,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(config.primary.timeout_secs);
        Self::from_parts(providers.into_iter().map(|p| (p, timeout)).collect(), config)
    }

    fn from_parts(
        providers: Vec<(Arc<dyn EmbeddingProvider>, Duration)>,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        let dims = providers.first().map(|(p, _)| p.dimensions()).unwrap_or(0);
        if let Some((p, _)) = providers.iter().find(|(p, _)| p.dimensions() != dims) {
            return Err(IndexError::Config(format!(
                "provider '{}' has {} dimensions, expected {}",
                p.name(),
                p.dimensions(),
                dims
            )));
        }

        let mut slots: Vec<Slot> = providers
            .into_iter()
            .map(|(provider, timeout)| Slot {
                provider,
                timeout,
                unavailable_until: AtomicU64::new(0),
            })
            .collect();
        slots.sort_by_key(|s| preference_rank(s.provider.name(), config.preference));

        Ok(Self {
            slots,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
            cooldown: Duration::from_secs(config.cooldown_secs),
            policy: config.on_failure,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
        })
    }

    /// Dimensionality shared by every registered provider (0 if none).
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// Whether any provider is registered at all.
    pub fn has_providers(&self) -> bool {
        !self.slots.is_empty()
    }

    /// `(name, model)` of every provider in preference order.
    pub fn providers(&self) -> Vec<(String, String)> {
        self.slots
            .iter()
            .map(|s| (s.provider.name().to_string(), s.provider.model().to_string()))
            .collect()
    }

    /// Probe every provider. Returns `(name, available)` pairs.
    pub async fn probe(&self) -> Vec<(String, bool)> {
        let checks = self.slots.iter().map(|s| async move {
            (s.provider.name().to_string(), s.provider.is_available().await)
        });
        join_all(checks).await
    }

    /// True when at least one provider answers its probe.
    pub async fn is_available(&self) -> bool {
        self.probe().await.iter().any(|(_, ok)| *ok)
    }

    /// Embed a single query text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(IndexError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }
        let mut vectors = self.embed_with_failover(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| IndexError::provider("manager", "empty embedding response", false))
    }

    /// Embed many texts. Never fails because of individual items; only
    /// cancellation aborts the batch.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<EmbedBatchOutcome> {
        if texts.is_empty() {
            return Ok(EmbedBatchOutcome::default());
        }

        let sub_batches = texts.chunks(self.batch_size).enumerate().map(|(n, batch)| {
            let permits = Arc::clone(&self.permits);
            async move {
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    return Err(IndexError::Cancelled);
                }
                let _permit = permits
                    .acquire()
                    .await
                    .map_err(|_| IndexError::Cancelled)?;
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    return Err(IndexError::Cancelled);
                }
                debug!(sub_batch = n, size = batch.len(), "embedding sub-batch");
                Ok(self.embed_sub_batch(batch).await)
            }
        });

        let mut vectors = Vec::with_capacity(texts.len());
        for result in join_all(sub_batches).await {
            vectors.extend(result?);
        }

        let mut degraded = Vec::new();
        for (i, slot) in vectors.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            degraded.push(i);
            if self.policy == EmbedFailurePolicy::ZeroVector {
                *slot = Some(vec![0.0; self.dims]);
            }
        }
        if !degraded.is_empty() {
            warn!(
                count = degraded.len(),
                policy = ?self.policy,
                "embedding degraded for some items"
            );
        }

        Ok(EmbedBatchOutcome { vectors, degraded })
    }

    async fn embed_sub_batch(&self, batch: &[String]) -> Vec<Option<Vec<f32>>> {
        match self.embed_with_failover(batch).await {
            Ok(vectors) => vectors.into_iter().map(Some).collect(),
            Err(e) if batch.len() > 1 => {
                warn!(size = batch.len(), error = %e, "sub-batch failed, embedding items individually");
                let mut out = Vec::with_capacity(batch.len());
                for text in batch {
                    match self.embed_with_failover(std::slice::from_ref(text)).await {
                        Ok(mut v) => out.push(v.pop()),
                        Err(e) => {
                            warn!(error = %e, "item could not be embedded");
                            out.push(None);
                        }
                    }
                }
                out
            }
            Err(e) => {
                warn!(error = %e, "item could not be embedded");
                vec![None]
            }
        }
    }

    /// Try candidates in preference order, skipping ones in cooldown while
    /// an alternative exists.
    async fn embed_with_failover(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.slots.is_empty() {
            return Err(IndexError::provider(
                "manager",
                "no embedding provider configured",
                false,
            ));
        }

        let mut candidates: Vec<&Slot> = self.slots.iter().filter(|s| !s.cooling_down()).collect();
        if candidates.is_empty() {
            // Everything is cooling down: probe the soonest to recover.
            if let Some(slot) = self
                .slots
                .iter()
                .min_by_key(|s| s.unavailable_until.load(Ordering::Relaxed))
            {
                candidates.push(slot);
            }
        }

        let mut last_err = None;
        for slot in candidates {
            match self.call_with_retry(slot, texts).await {
                Ok(vectors) => {
                    slot.recover();
                    return Ok(vectors);
                }
                Err(e) => {
                    if self.slots.len() > 1 {
                        warn!(
                            provider = slot.provider.name(),
                            cooldown_secs = self.cooldown.as_secs(),
                            error = %e,
                            "provider failed, cooling down"
                        );
                        slot.cool_down(self.cooldown);
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            IndexError::provider("manager", "no embedding provider available", true)
        }))
    }

    async fn call_with_retry(&self, slot: &Slot, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let provider = &slot.provider;
        let max_chars = provider.max_tokens().max(1).saturating_mul(CHARS_PER_TOKEN);
        let inputs: Vec<String> = texts.iter().map(|t| truncate(t, max_chars)).collect();

        with_backoff(self.max_retries, self.retry_base_ms, || {
            let inputs = &inputs;
            async move {
                let vectors = with_timeout(slot.timeout, provider.embed_batch(inputs), || {
                    IndexError::provider(
                        provider.name(),
                        format!("timed out after {}s", slot.timeout.as_secs()),
                        true,
                    )
                })
                .await?;
                check_vectors(provider.name(), self.dims, inputs.len(), &vectors)?;
                Ok(vectors)
            }
        })
        .await
    }
}

/// Cut `text` to at most `max_chars` bytes on a char boundary.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Deterministic provider that fails its first `fail_first` calls, or
    /// any call containing `poison`.
    struct ScriptedProvider {
        name: &'static str,
        dims: usize,
        fail_first: usize,
        transient: bool,
        poison: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                dims: 3,
                fail_first: 0,
                transient: true,
                poison: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn model(&self) -> &str {
            "scripted"
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
        fn max_tokens(&self) -> usize {
            512
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(IndexError::provider(self.name, "unavailable", self.transient));
            }
            if let Some(p) = self.poison {
                if texts.iter().any(|t| t.contains(p)) {
                    return Err(IndexError::provider(self.name, "rejected input", false));
                }
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.0])
                .collect())
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size: 2,
            max_retries: 2,
            retry_base_ms: 1,
            concurrency: 2,
            cooldown_secs: 60,
            ..Default::default()
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[tokio::test]
    async fn batches_keep_input_order() {
        let p = Arc::new(ScriptedProvider::new("mock"));
        let m = ProviderManager::with_providers(vec![p.clone()], &config()).unwrap();
        let out = m.embed_batch(&texts(5), None).await.unwrap();
        assert!(out.degraded.is_empty());
        let lens: Vec<f32> = out.vectors.iter().map(|v| v.as_ref().unwrap()[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(p.calls(), 3);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut p = ScriptedProvider::new("mock");
        p.fail_first = 2;
        let p = Arc::new(p);
        let m = ProviderManager::with_providers(vec![p.clone()], &config()).unwrap();
        let v = m.embed("hello").await.unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(p.calls(), 3);
    }

    #[tokio::test]
    async fn failing_provider_fails_over_and_cools_down() {
        let mut primary = ScriptedProvider::new("openai");
        primary.fail_first = usize::MAX;
        let primary = Arc::new(primary);
        let backup = Arc::new(ScriptedProvider::new("ollama"));
        let m = ProviderManager::with_providers(vec![primary.clone(), backup.clone()], &config())
            .unwrap();

        m.embed("first").await.unwrap();
        // 1 call + 2 retries before failing over.
        assert_eq!(primary.calls(), 3);
        m.embed("second").await.unwrap();
        // Cooling down: not tried again.
        assert_eq!(primary.calls(), 3);
        assert_eq!(backup.calls(), 2);
    }

    #[tokio::test]
    async fn preference_orders_providers() {
        let a: Arc<dyn EmbeddingProvider> = Arc::new(ScriptedProvider::new("openai"));
        let b: Arc<dyn EmbeddingProvider> = Arc::new(ScriptedProvider::new("local"));
        let mut cfg = config();
        cfg.preference = ProviderPreference::Cost;
        let m = ProviderManager::with_providers(vec![a.clone(), b.clone()], &cfg).unwrap();
        assert_eq!(m.providers()[0].0, "local");
        cfg.preference = ProviderPreference::Quality;
        let m = ProviderManager::with_providers(vec![b, a], &cfg).unwrap();
        assert_eq!(m.providers()[0].0, "openai");
    }

    #[tokio::test]
    async fn poisoned_item_is_skipped_by_default() {
        let mut p = ScriptedProvider::new("mock");
        p.poison = Some("bad");
        let m = ProviderManager::with_providers(vec![Arc::new(p)], &config()).unwrap();
        let input = vec!["ok".to_string(), "bad".to_string(), "fine".to_string()];
        let out = m.embed_batch(&input, None).await.unwrap();
        assert_eq!(out.degraded, vec![1]);
        assert!(out.vectors[0].is_some());
        assert!(out.vectors[1].is_none());
        assert!(out.vectors[2].is_some());
    }

    #[tokio::test]
    async fn zero_vector_policy_fills_degraded_items() {
        let mut p = ScriptedProvider::new("mock");
        p.poison = Some("bad");
        let mut cfg = config();
        cfg.on_failure = EmbedFailurePolicy::ZeroVector;
        let m = ProviderManager::with_providers(vec![Arc::new(p)], &cfg).unwrap();
        let input = vec!["bad".to_string(), "ok".to_string()];
        let out = m.embed_batch(&input, None).await.unwrap();
        assert_eq!(out.degraded, vec![0]);
        assert_eq!(out.vectors[0].as_deref(), Some(&[0.0, 0.0, 0.0][..]));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let mut p = ScriptedProvider::new("mock");
        p.dims = 4;
        let m = ProviderManager::with_providers(vec![Arc::new(p)], &config()).unwrap();
        let err = m.embed("hi").await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn mixed_dimensions_are_a_config_error() {
        let a: Arc<dyn EmbeddingProvider> = Arc::new(ScriptedProvider::new("a"));
        let mut b = ScriptedProvider::new("b");
        b.dims = 8;
        let result = ProviderManager::with_providers(vec![a, Arc::new(b)], &config());
        assert!(matches!(result, Err(IndexError::Config(_))));
    }

    #[tokio::test]
    async fn cancelled_batch_aborts() {
        let m = ProviderManager::with_providers(
            vec![Arc::new(ScriptedProvider::new("mock"))],
            &config(),
        )
        .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = m.embed_batch(&texts(3), Some(&token)).await.unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
