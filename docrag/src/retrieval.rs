//! Query-time retrieval: embed the question, search the store, rank.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::RagConfig;
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// Build the text that gets embedded for a query.
///
/// A non-blank `topic_weight` is prepended as `Topic: <weight> Question: <query>`.
pub fn compose_query(query: &str, topic_weight: Option<&str>) -> String {
    match topic_weight.map(str::trim).filter(|t| !t.is_empty()) {
        Some(topic) => format!("Topic: {topic} Question: {query}"),
        None => query.to_string(),
    }
}

/// Finds the stored chunks nearest to a question.
///
/// Uses the same [`EmbeddingProvider`] as ingestion. Never calls a
/// language model.
///
/// # Example
///
/// ```rust,ignore
/// let retriever = Retriever::new(RagConfig::default(), embedder, store);
/// let results = retriever.retrieve("docs", "What is the cost?", 3, Some("pricing")).await?;
/// ```
#[derive(Clone)]
pub struct Retriever {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
}

impl Retriever {
    /// Create a retriever over `vector_store`.
    pub fn new(
        config: RagConfig,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        Self { config, embedding_provider, vector_store }
    }

    /// Return a reference to the retrieval configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Retrieve up to `k` chunks for `query`, best first.
    ///
    /// `k` is clamped to `[1, collection size]`. An empty collection yields
    /// no results without embedding anything.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] for a blank query, and propagates
    /// embedding and store failures.
    pub async fn retrieve(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        topic_weight: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(RagError::invalid_input("query must not be empty"));
        }

        let size = self.vector_store.count(collection).await?;
        if size == 0 {
            debug!(collection, "collection is empty, skipping search");
            return Ok(Vec::new());
        }
        let k = k.clamp(1, size);

        let text = compose_query(query, topic_weight);
        let embedding = self.embedding_provider.embed(&text).await.inspect_err(|e| {
            error!(error = %e, "embedding failed during query");
        })?;

        let mut results =
            self.vector_store.search(collection, &embedding, k).await.inspect_err(|e| {
                error!(collection, error = %e, "vector store search failed");
            })?;

        if let Some(max) = self.config.max_distance {
            results.retain(|r| r.distance <= max);
        }

        info!(collection, k, result_count = results.len(), "query completed");
        Ok(results)
    }

    /// Retrieve with the configured default `top_k` and no topic weight.
    ///
    /// # Errors
    ///
    /// See [`retrieve`](Self::retrieve).
    pub async fn query(&self, collection: &str, query: &str) -> Result<Vec<SearchResult>> {
        self.retrieve(collection, query, self.config.top_k, None).await
    }
}
