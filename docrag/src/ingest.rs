//! Batch ingestion: load → chunk → embed → store.
//!
//! The [`IngestionPipeline`] writes each document as a unit. A document that
//! fails to load, chunk or embed leaves its previously stored version
//! untouched and is reported as failed; the rest of the batch carries on.
//!
//! # Example
//!
//! ```rust,ignore
//! use docrag::{IngestionPipeline, LocalVectorStore, HashEmbeddingProvider, RagConfig};
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashEmbeddingProvider::default()))
//!     .vector_store(Arc::new(LocalVectorStore::open("./chroma_db").await?))
//!     .build()?;
//!
//! let report = pipeline.ingest("docs", &paths).await?;
//! println!("{} chunks written", report.total_chunks());
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::Document;
use crate::embedding::{EmbeddingProvider, check_batch_len};
use crate::error::{RagError, Result};
use crate::loader::{AutoLoader, DocumentLoader};
use crate::vectorstore::VectorStore;

/// What happened to one document of a batch.
#[derive(Debug)]
pub enum DocumentOutcome {
    /// The document's chunks were written.
    Ingested {
        /// Number of chunks written.
        chunks: usize,
        /// Number of stale chunks from a previous version that were removed.
        removed: usize,
    },
    /// The document was skipped; any earlier version is unchanged.
    Failed {
        /// Why the document failed.
        error: RagError,
    },
}

/// Outcome for a single document, keyed by its ID (or path).
#[derive(Debug)]
pub struct DocumentReport {
    /// Document ID, or the path if the document never loaded.
    pub document_id: String,
    /// What happened.
    pub outcome: DocumentOutcome,
}

/// Per-document results of an ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// One entry per input, in input order.
    pub documents: Vec<DocumentReport>,
}

impl IngestReport {
    /// Total number of chunks written across all documents.
    pub fn total_chunks(&self) -> usize {
        self.documents
            .iter()
            .map(|d| match d.outcome {
                DocumentOutcome::Ingested { chunks, .. } => chunks,
                DocumentOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    /// Number of documents ingested successfully.
    pub fn succeeded(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| matches!(d.outcome, DocumentOutcome::Ingested { .. }))
            .count()
    }

    /// Documents that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &RagError)> {
        self.documents.iter().filter_map(|d| match &d.outcome {
            DocumentOutcome::Failed { error } => Some((d.document_id.as_str(), error)),
            DocumentOutcome::Ingested { .. } => None,
        })
    }

    /// Whether every document was ingested.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    fn record(&mut self, document_id: String, result: Result<IngestedDocument>) -> Result<()> {
        let outcome = match result {
            Ok(stats) => DocumentOutcome::Ingested { chunks: stats.chunks, removed: stats.removed },
            Err(e @ RagError::StoreUnavailable { .. }) => return Err(e),
            Err(error) => {
                warn!(document.id = %document_id, error = %error, "document skipped");
                DocumentOutcome::Failed { error }
            }
        };
        self.documents.push(DocumentReport { document_id, outcome });
        Ok(())
    }
}

/// Counts for one successfully ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestedDocument {
    /// Number of chunks written.
    pub chunks: usize,
    /// Number of stale chunks removed.
    pub removed: usize,
}

/// Writes documents into a vector store collection.
///
/// Construct one via [`IngestionPipeline::builder()`].
pub struct IngestionPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    chunker: Arc<dyn Chunker>,
    loader: Arc<dyn DocumentLoader>,
}

impl IngestionPipeline {
    /// Create a new [`IngestionPipelineBuilder`].
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Load and ingest every path into `collection`.
    ///
    /// The collection is created with the configured metric first.
    /// Per-document failures end up in the report. The store is flushed
    /// once, after the last document.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned: the collection cannot be created, or
    /// the store becomes unavailable.
    pub async fn ingest<P: AsRef<Path>>(
        &self,
        collection: &str,
        paths: &[P],
    ) -> Result<IngestReport> {
        self.ensure_collection(collection).await?;

        let mut report = IngestReport::default();
        let written = self.write_paths(collection, paths, &mut report).await;
        self.finish_batch(collection, report, written).await
    }

    /// Ingest documents that are already in memory.
    ///
    /// # Errors
    ///
    /// See [`ingest`](Self::ingest).
    pub async fn ingest_documents(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<IngestReport> {
        self.ensure_collection(collection).await?;

        let mut report = IngestReport::default();
        let written = self.write_documents(collection, documents, &mut report).await;
        self.finish_batch(collection, report, written).await
    }

    /// Ingest a single document: chunk → embed → replace → flush.
    ///
    /// Re-ingesting a document with the same ID overwrites its chunks and
    /// removes any that are no longer produced.
    ///
    /// # Errors
    ///
    /// Returns the first error hit; the stored version of the document is
    /// unchanged unless the store write itself failed.
    pub async fn ingest_document(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<IngestedDocument> {
        self.ensure_collection(collection).await?;
        let written = self.write_document(collection, document).await;
        let flushed = self.vector_store.flush().await;
        let stats = written?;
        flushed?;
        Ok(stats)
    }

    async fn write_paths<P: AsRef<Path>>(
        &self,
        collection: &str,
        paths: &[P],
        report: &mut IngestReport,
    ) -> Result<()> {
        for path in paths {
            let path = path.as_ref();
            match self.loader.load(path).await {
                Ok(document) => {
                    let result = self.write_document(collection, &document).await;
                    report.record(document.id, result)?;
                }
                Err(e) => report.record(path.display().to_string(), Err(e))?,
            }
        }
        Ok(())
    }

    async fn write_documents(
        &self,
        collection: &str,
        documents: &[Document],
        report: &mut IngestReport,
    ) -> Result<()> {
        for document in documents {
            let result = self.write_document(collection, document).await;
            report.record(document.id.clone(), result)?;
        }
        Ok(())
    }

    /// Flush once for the whole batch, including one cut short by a fatal error.
    async fn finish_batch(
        &self,
        collection: &str,
        report: IngestReport,
        written: Result<()>,
    ) -> Result<IngestReport> {
        let flushed = self.vector_store.flush().await;
        written?;
        flushed?;

        info!(
            collection,
            documents = report.documents.len(),
            succeeded = report.succeeded(),
            chunks = report.total_chunks(),
            "ingestion finished"
        );
        Ok(report)
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.vector_store.create_collection(collection, self.config.metric).await.inspect_err(|e| {
            error!(collection, error = %e, "failed to create collection");
        })
    }

    async fn write_document(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<IngestedDocument> {
        let mut chunks = self.chunker.chunk(document)?;

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self.embedding_provider.embed_batch(&texts).await.inspect_err(|e| {
            error!(document.id = %document.id, error = %e, "embedding failed during ingestion");
        })?;
        check_batch_len(self.embedding_provider.model_id(), chunks.len(), embeddings.len())?;

        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }

        let removed = self.vector_store.replace_document(collection, &document.id, &chunks).await?;

        let chunk_count = chunks.len();
        info!(document.id = %document.id, chunk_count, removed, "ingested document");
        Ok(IngestedDocument { chunks: chunk_count, removed })
    }
}

/// Builder for constructing an [`IngestionPipeline`].
///
/// The embedding provider and vector store are required. The chunker
/// defaults to a [`RecursiveChunker`] sized from the config and the loader
/// to [`AutoLoader::default()`].
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    chunker: Option<Arc<dyn Chunker>>,
    loader: Option<Arc<dyn DocumentLoader>>,
}

impl IngestionPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Override the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Override the document loader.
    pub fn loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Build the [`IngestionPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing or
    /// the config is invalid.
    pub fn build(self) -> Result<IngestionPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;
        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap))
        });
        let loader = self.loader.unwrap_or_else(|| Arc::new(AutoLoader::default()));

        Ok(IngestionPipeline { config, embedding_provider, vector_store, chunker, loader })
    }
}
