//! Local sentence-transformer embeddings via [fastembed](https://docs.rs/fastembed).
//!
//! This module is only available when the `fastembed` feature is enabled.
//! The ONNX model is downloaded and loaded on first use, then shared
//! read-only for the life of the provider.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::embedding::{EmbeddingProvider, check_batch_len};
use crate::error::{RagError, Result};

/// The model the ingestion job and the UI have always used.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

const PROVIDER: &str = "fastembed";

/// Map a model identifier onto a fastembed model and its dimensionality.
fn resolve_model(model_id: &str) -> Result<(EmbeddingModel, usize)> {
    let normalized = model_id.trim().trim_start_matches("sentence-transformers/").to_lowercase();
    match normalized.as_str() {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "all-minilm-l12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        _ => Err(RagError::ConfigError(format!("unsupported fastembed model '{model_id}'"))),
    }
}

/// An [`EmbeddingProvider`] running a sentence-transformer locally.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::fastembed::FastEmbedProvider;
///
/// let provider = FastEmbedProvider::new("all-MiniLM-L6-v2")?;
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), 384);
/// ```
pub struct FastEmbedProvider {
    model_id: String,
    model: EmbeddingModel,
    dimensions: usize,
    cache_dir: Option<PathBuf>,
    loaded: OnceCell<Arc<TextEmbedding>>,
}

impl FastEmbedProvider {
    /// Create a provider for the given model. Nothing is loaded yet.
    pub fn new(model_id: impl Into<String>) -> Result<Self> {
        let model_id = model_id.into();
        let (model, dimensions) = resolve_model(&model_id)?;
        Ok(Self { model_id, model, dimensions, cache_dir: None, loaded: OnceCell::new() })
    }

    /// Store downloaded model files under `dir` instead of the default cache.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    fn map_err(e: impl std::fmt::Display) -> RagError {
        RagError::EmbeddingError { provider: PROVIDER.to_string(), message: e.to_string() }
    }

    async fn model(&self) -> Result<Arc<TextEmbedding>> {
        let model = self
            .loaded
            .get_or_try_init(|| async {
                let mut options = InitOptions::new(self.model.clone())
                    .with_show_download_progress(false);
                if let Some(dir) = &self.cache_dir {
                    options = options.with_cache_dir(dir.clone());
                }
                info!(model = %self.model_id, "loading embedding model");
                let loaded = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
                    .await
                    .map_err(Self::map_err)?
                    .map_err(Self::map_err)?;
                Ok::<_, RagError>(Arc::new(loaded))
            })
            .await?;
        Ok(Arc::clone(model))
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::EmbeddingError {
            provider: PROVIDER.into(),
            message: "model returned no embedding".into(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model_id,
            "embedding batch"
        );

        let model = self.model().await?;
        let owned: Vec<String> = texts.iter().map(|t| (*t).to_string()).collect();
        let embeddings = tokio::task::spawn_blocking(move || model.embed(owned, None))
            .await
            .map_err(Self::map_err)?
            .map_err(Self::map_err)?;

        check_batch_len(PROVIDER, texts.len(), embeddings.len())?;
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
