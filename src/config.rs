//! TOML configuration.
//!
//! The configuration is loaded once with [`load_config`], validated, and then
//! passed by reference into every component that needs it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    pub registry_path: PathBuf,
    #[serde(default)]
    pub base_paths: Vec<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_true")]
    pub incremental: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_collection() -> String {
    "context".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_section_max_tokens")]
    pub section_max_tokens: usize,
    #[serde(default = "default_min_comment_chars")]
    pub min_comment_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            section_max_tokens: default_section_max_tokens(),
            min_comment_chars: default_min_comment_chars(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}
fn default_section_max_tokens() -> usize {
    1000
}
fn default_min_comment_chars() -> usize {
    200
}

/// Caller preference used to order providers when more than one is usable.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPreference {
    Cost,
    Latency,
    #[default]
    Quality,
}

/// What to do with a chunk whose embedding still fails after retries,
/// failover, and the one-by-one fallback.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbedFailurePolicy {
    /// Exclude the chunk from the store and report it as degraded.
    #[default]
    Skip,
    /// Store an all-zero vector for the chunk and report it as degraded.
    ZeroVector,
}

/// Settings for a single embedding backend.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(flatten)]
    pub primary: ProviderConfig,
    #[serde(default)]
    pub fallbacks: Vec<ProviderConfig>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub preference: ProviderPreference,
    #[serde(default)]
    pub on_failure: EmbedFailurePolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig::default(),
            fallbacks: Vec::new(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            concurrency: default_concurrency(),
            cooldown_secs: default_cooldown_secs(),
            preference: ProviderPreference::default(),
            on_failure: EmbedFailurePolicy::default(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.primary.is_enabled()
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}
fn default_cooldown_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_store_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            api_key_env: None,
            max_retries: default_store_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_store_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_recency_max_age_days")]
    pub recency_max_age_days: u32,
    #[serde(default)]
    pub weights: ScoreWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            similarity_threshold: default_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
            recency_max_age_days: default_recency_max_age_days(),
            weights: ScoreWeights::default(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_threshold() -> f32 {
    0.3
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_recency_max_age_days() -> u32 {
    365
}

/// Blend weights for the final ranking score.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScoreWeights {
    #[serde(default = "default_w_similarity")]
    pub similarity: f64,
    #[serde(default = "default_w_recency")]
    pub recency: f64,
    #[serde(default = "default_w_affinity")]
    pub affinity: f64,
    #[serde(default = "default_w_usage")]
    pub usage: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: default_w_similarity(),
            recency: default_w_recency(),
            affinity: default_w_affinity(),
            usage: default_w_usage(),
        }
    }
}

fn default_w_similarity() -> f64 {
    0.7
}
fn default_w_recency() -> f64 {
    0.15
}
fn default_w_affinity() -> f64 {
    0.1
}
fn default_w_usage() -> f64 {
    0.05
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check the invariants every component relies on.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.section_max_tokens == 0 {
        anyhow::bail!("chunking.section_max_tokens must be > 0");
    }

    if config.index.workers == 0 {
        anyhow::bail!("index.workers must be > 0");
    }
    if config.index.collection.trim().is_empty() {
        anyhow::bail!("index.collection must not be empty");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.concurrency == 0 {
        anyhow::bail!("embedding.concurrency must be > 0");
    }

    for provider in std::iter::once(&config.embedding.primary).chain(&config.embedding.fallbacks) {
        match provider.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }
        if provider.is_enabled() && provider.dims.unwrap_or(0) == 0 {
            anyhow::bail!(
                "embedding dims must be > 0 when provider is '{}'",
                provider.provider
            );
        }
    }

    // A single active dimensionality: fallbacks must agree with the primary.
    if let Some(primary_dims) = config.embedding.primary.dims {
        for fb in &config.embedding.fallbacks {
            if fb.dims.is_some_and(|d| d != primary_dims) {
                anyhow::bail!(
                    "embedding fallback '{}' has dims {:?}, expected {}",
                    fb.provider,
                    fb.dims,
                    primary_dims
                );
            }
        }
    }

    match config.vector_store.backend.as_str() {
        "memory" => {}
        "qdrant" => {
            if config.vector_store.url.is_none() {
                anyhow::bail!("vector_store.url is required for the qdrant backend");
            }
        }
        other => anyhow::bail!(
            "Unknown vector store backend: '{}'. Must be memory or qdrant.",
            other
        ),
    }

    let r = &config.retrieval;
    if !(0.0..=1.0).contains(&r.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if r.default_limit == 0 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }
    let w = r.weights;
    if [w.similarity, w.recency, w.affinity, w.usage]
        .iter()
        .any(|v| *v < 0.0)
    {
        anyhow::bail!("retrieval.weights must be non-negative");
    }
    if w.similarity < w.recency.max(w.affinity).max(w.usage) {
        anyhow::bail!("retrieval.weights.similarity must be the dominant weight");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Config {
        let content = format!(
            r#"
[index]
registry_path = "/tmp/registry.sqlite"
{}
"#,
            extra
        );
        toml::from_str(&content).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse("");
        assert!(validate(&config).is_ok());
        assert!(config.index.incremental);
        assert_eq!(config.embedding.on_failure, EmbedFailurePolicy::Skip);
        assert_eq!(config.vector_store.backend, "memory");
    }

    #[test]
    fn enabled_provider_requires_dims() {
        let config = parse(
            r#"
[embedding]
provider = "openai"
model = "text-embedding-3-small"
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn fallback_dims_must_match() {
        let config = parse(
            r#"
[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536

[[embedding.fallbacks]]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
"#,
        );
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("fallback"), "{}", err);
    }

    #[test]
    fn similarity_weight_must_dominate() {
        let config = parse(
            r#"
[retrieval.weights]
similarity = 0.1
recency = 0.5
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn qdrant_requires_url() {
        let config = parse(
            r#"
[vector_store]
backend = "qdrant"
"#,
        );
        assert!(validate(&config).is_err());
    }
}
