//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: never available; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models in-process via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after model download.
//!
//! Providers make exactly one backend call per [`EmbeddingProvider::embed_batch`].
//! Sub-batching, retries, timeouts, failover, and degradation live in
//! [`manager::ProviderManager`].
//!
//! # Provider Selection
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"disabled"` | [`DisabledProvider`] |
//! | `"openai"` | [`OpenAIProvider`] |
//! | `"ollama"` | [`OllamaProvider`] |
//! | `"local"` | `LocalProvider` (requires `local-embeddings-fastembed`) |
//!
//! # Error Classification
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → transient
//! - HTTP 4xx (client error, not 429) → permanent
//! - Network errors and timeouts → transient
//! - Wrong vector count or length → permanent (backend contract violation)

#[cfg(feature = "local-embeddings-fastembed")]
mod local;
pub mod manager;
mod ollama;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::{IndexError, Result};

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;
pub use manager::{EmbedBatchOutcome, ProviderManager};
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

/// Default per-input token limit when a provider does not declare one.
pub const DEFAULT_MAX_TOKENS: usize = 8191;

/// A backend that turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider family (`"openai"`, `"ollama"`, `"local"`, ...).
    fn name(&self) -> &str;
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model(&self) -> &str;
    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;
    /// Largest input the backend accepts, in tokens.
    fn max_tokens(&self) -> usize;

    /// Embed a batch in one backend call. Vectors come back in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed one text. Empty input is rejected with
    /// [`IndexError::InvalidInput`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(IndexError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        check_vectors(self.name(), self.dimensions(), 1, &vectors)?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::provider(self.name(), "empty embedding response", false))
    }

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;
}

/// Verify a backend response: one vector per input, each of the declared
/// length. A mismatch is a contract violation, never transient.
pub(crate) fn check_vectors(
    provider: &str,
    dims: usize,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != expected {
        return Err(IndexError::provider(
            provider,
            format!("expected {} vectors, got {}", expected, vectors.len()),
            false,
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(IndexError::provider(
            provider,
            format!(
                "dimension mismatch: expected {}, got {}",
                dims,
                bad.len()
            ),
            false,
        ));
    }
    Ok(())
}

/// Map a `reqwest` failure onto the error taxonomy.
pub(crate) fn http_error(provider: &str, err: reqwest::Error) -> IndexError {
    let transient = err.is_connect() || err.is_timeout() || err.is_request();
    IndexError::provider(provider, err.to_string(), transient)
}

/// Map a non-success HTTP status onto the error taxonomy.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> IndexError {
    let transient = status.as_u16() == 429 || status.is_server_error();
    IndexError::provider(
        provider,
        format!("API error {}: {}", status, body),
        transient,
    )
}

// ============ Disabled Provider ============

/// Provider used when `embedding.provider = "disabled"`. Never available;
/// every embed call fails.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }
    fn model(&self) -> &str {
        "disabled"
    }
    fn dimensions(&self) -> usize {
        0
    }
    fn max_tokens(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(IndexError::provider(
            "disabled",
            "embedding provider is disabled",
            false,
        ))
    }
    async fn is_available(&self) -> bool {
        false
    }
}

/// Create the provider described by one `[embedding]` / `[[embedding.fallbacks]]`
/// entry.
///
/// # Errors
///
/// [`IndexError::Config`] for unknown provider names, missing model/dims,
/// a missing API key, or `local` without the fastembed feature.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(IndexError::Config(
            "local embedding provider requires --features local-embeddings-fastembed".into(),
        )),
        other => Err(IndexError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// all-zero vectors.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn vector_checks() {
        assert!(check_vectors("p", 2, 1, &[vec![0.1, 0.2]]).is_ok());
        let err = check_vectors("p", 3, 1, &[vec![0.1, 0.2]]).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
        assert!(!err.is_transient());
        assert!(check_vectors("p", 2, 2, &[vec![0.1, 0.2]]).is_err());
    }

    #[tokio::test]
    async fn disabled_provider_is_never_available() {
        let p = DisabledProvider;
        assert!(!p.is_available().await);
        assert!(p.embed("hello").await.is_err());
    }

    #[tokio::test]
    async fn empty_text_is_invalid_input() {
        let p = DisabledProvider;
        let err = p.embed("   ").await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let cfg = ProviderConfig {
            provider: "nope".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&cfg),
            Err(IndexError::Config(_))
        ));
    }
}
