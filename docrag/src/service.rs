//! Wiring: turn [`Settings`] into live backends.
//!
//! Nothing in the crate is a global. [`Services::init`] builds the embedder,
//! opens the store and (optionally) the answer generator once; callers pass
//! the resulting `Arc`s to an [`IngestionPipeline`] or [`Retriever`] and end
//! with [`Services::shutdown`].

use std::sync::Arc;

use tracing::info;

use crate::config::{EmbedderConfig, GeneratorConfig, Settings, StoreConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::AnswerGenerator;
use crate::hash::HashEmbeddingProvider;
use crate::ingest::IngestionPipeline;
use crate::local::LocalVectorStore;
use crate::retrieval::Retriever;
use crate::vectorstore::VectorStore;

#[cfg(not(all(feature = "fastembed", feature = "openai", feature = "qdrant")))]
fn missing_feature(feature: &str) -> RagError {
    RagError::ConfigError(format!("docrag was built without the `{feature}` feature"))
}

/// Construct the embedding provider described by `config`.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] when the backend's feature is not
/// compiled in, or its own constructor errors (unknown model, or a missing
/// key for the public OpenAI API).
pub fn build_embedder(config: &EmbedderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config {
        EmbedderConfig::Hash { dimensions } => {
            Ok(Arc::new(HashEmbeddingProvider::new(*dimensions)))
        }
        #[cfg(feature = "fastembed")]
        EmbedderConfig::FastEmbed { model } => {
            Ok(Arc::new(crate::fastembed::FastEmbedProvider::new(model.clone())?))
        }
        #[cfg(not(feature = "fastembed"))]
        EmbedderConfig::FastEmbed { .. } => Err(missing_feature("fastembed")),
        #[cfg(feature = "openai")]
        EmbedderConfig::OpenAI { model, dimensions, base_url } => {
            use crate::openai::OpenAIEmbeddingProvider;

            let provider = match base_url {
                Some(url) => {
                    let key = std::env::var("OPENAI_API_KEY").ok();
                    OpenAIEmbeddingProvider::compatible(url, key)
                }
                None => OpenAIEmbeddingProvider::from_env()?,
            };
            let provider = provider.with_model(model.clone());
            Ok(Arc::new(match dimensions {
                Some(dims) => provider.with_dimensions(*dims),
                None => provider,
            }))
        }
        #[cfg(not(feature = "openai"))]
        EmbedderConfig::OpenAI { .. } => Err(missing_feature("openai")),
    }
}

/// Open the vector store described by `config`.
///
/// # Errors
///
/// Returns [`RagError::StoreUnavailable`] if the store cannot be opened, or
/// [`RagError::ConfigError`] when the backend's feature is not compiled in.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(LocalVectorStore::in_memory())),
        StoreConfig::Local { path } => Ok(Arc::new(LocalVectorStore::open(path).await?)),
        #[cfg(feature = "qdrant")]
        StoreConfig::Qdrant { url } => Ok(Arc::new(crate::qdrant::QdrantVectorStore::new(url)?)),
        #[cfg(not(feature = "qdrant"))]
        StoreConfig::Qdrant { .. } => Err(missing_feature("qdrant")),
    }
}

/// Construct the answer generator described by `config`.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] when the `openai` feature is not
/// compiled in.
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn AnswerGenerator>> {
    #[cfg(feature = "openai")]
    {
        Ok(Arc::new(crate::generation::openai::OpenAICompatibleGenerator::new(config.clone())))
    }
    #[cfg(not(feature = "openai"))]
    {
        let _ = config;
        Err(missing_feature("openai"))
    }
}

/// The live backends for one process.
#[derive(Clone)]
pub struct Services {
    settings: Settings,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    generator: Option<Arc<dyn AnswerGenerator>>,
}

impl Services {
    /// Validate `settings` and construct every backend they describe.
    ///
    /// # Errors
    ///
    /// Propagates configuration errors and store failures.
    pub async fn init(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let embedding_provider = build_embedder(&settings.embedder)?;
        let vector_store = open_store(&settings.store).await?;
        let generator = settings.generator.as_ref().map(build_generator).transpose()?;

        info!(
            collection = %settings.collection,
            embedder = embedding_provider.model_id(),
            store = vector_store.backend(),
            generator = generator.as_ref().map(|g| g.name()),
            "services initialised"
        );
        Ok(Self { settings, embedding_provider, vector_store, generator })
    }

    /// Assemble services from already-constructed backends.
    pub fn from_parts(
        settings: Settings,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        Self { settings, embedding_provider, vector_store, generator: None }
    }

    /// Attach an answer generator.
    pub fn with_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The settings these services were built from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The shared embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// The shared vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// The answer generator, if one is configured.
    pub fn generator(&self) -> Option<&Arc<dyn AnswerGenerator>> {
        self.generator.as_ref()
    }

    /// An ingestion pipeline over these backends.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the settings are invalid.
    pub fn ingestion_pipeline(&self) -> Result<IngestionPipeline> {
        IngestionPipeline::builder()
            .config(self.settings.rag.clone())
            .embedding_provider(Arc::clone(&self.embedding_provider))
            .vector_store(Arc::clone(&self.vector_store))
            .build()
    }

    /// A retriever over these backends.
    pub fn retriever(&self) -> Retriever {
        Retriever::new(
            self.settings.rag.clone(),
            Arc::clone(&self.embedding_provider),
            Arc::clone(&self.vector_store),
        )
    }

    /// Flush the store. Call once before the process exits.
    ///
    /// # Errors
    ///
    /// Propagates the store's flush error.
    pub async fn shutdown(self) -> Result<()> {
        self.vector_store.flush().await?;
        info!(store = self.vector_store.backend(), "services shut down");
        Ok(())
    }
}
