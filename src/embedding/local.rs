//! In-process embeddings via fastembed.
//!
//! The model is downloaded from Hugging Face on first use and cached; after
//! that no network calls are made. Inference runs on the blocking pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{check_vectors, EmbeddingProvider};
use crate::config::ProviderConfig;
use crate::error::{IndexError, Result};

pub struct LocalProvider {
    model_name: String,
    model: EmbeddingModel,
    dims: usize,
    max_tokens: usize,
    loaded: Arc<Mutex<Option<TextEmbedding>>>,
}

impl LocalProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (model, default_dims) = resolve_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            dims: config.dims.unwrap_or(default_dims),
            max_tokens: config.max_tokens.unwrap_or(512),
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1" => Ok((EmbeddingModel::NomicEmbedTextV1, 768)),
        "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((EmbeddingModel::MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((EmbeddingModel::MultilingualE5Large, 1024)),
        other => Err(IndexError::Config(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }
    fn model(&self) -> &str {
        &self.model_name
    }
    fn dimensions(&self) -> usize {
        self.dims
    }
    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let texts = texts.to_vec();
        let expected = texts.len();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = loaded
                .lock()
                .map_err(|_| IndexError::provider("local", "model lock poisoned", false))?;
            if guard.is_none() {
                let embedding = TextEmbedding::try_new(
                    InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| {
                    IndexError::provider("local", format!("failed to load model: {}", e), false)
                })?;
                *guard = Some(embedding);
            }
            let Some(text_model) = guard.as_mut() else {
                return Err(IndexError::provider("local", "model not loaded", false));
            };
            text_model
                .embed(texts, None)
                .map_err(|e| IndexError::provider("local", format!("inference failed: {}", e), false))
        })
        .await
        .map_err(|e| IndexError::provider("local", format!("embedding task failed: {}", e), false))??;

        check_vectors("local", self.dims, expected, &vectors)?;
        Ok(vectors)
    }

    async fn is_available(&self) -> bool {
        true
    }
}
