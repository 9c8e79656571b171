//! Vector store trait for storing and searching vector embeddings.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::distance::DistanceMetric;
use crate::document::{Chunk, SearchResult};
use crate::error::Result;

/// A storage backend for vector embeddings with nearest-neighbor search.
///
/// Implementations manage named, isolated collections of [`Chunk`]s. Each
/// collection has a distance metric fixed at creation and a dimension fixed
/// by its first write.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::{DistanceMetric, LocalVectorStore, VectorStore};
///
/// let store = LocalVectorStore::open("./chroma_db").await?;
/// store.create_collection("docs", DistanceMetric::Cosine).await?;
/// store.upsert("docs", &chunks).await?;
/// let results = store.search("docs", &query_embedding, 5).await?;
/// store.flush().await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn backend(&self) -> &str;

    /// Create a named collection. No-op if it already exists with the same metric.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`](crate::RagError::ConfigError) if the
    /// collection exists with a different metric.
    async fn create_collection(&self, name: &str, metric: DistanceMetric) -> Result<()>;

    /// Delete a named collection and all its data.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Insert or overwrite chunks by ID. Chunks must have embeddings set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch)
    /// if any embedding disagrees with the collection's dimension; nothing is
    /// written in that case.
    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()>;

    /// Delete chunks by their IDs from a collection.
    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()>;

    /// Search for the `top_k` chunks closest to the given embedding.
    ///
    /// Returns results ordered by ascending distance. A missing or empty
    /// collection yields an empty result.
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Number of chunks stored in a collection (0 if it does not exist).
    async fn count(&self, collection: &str) -> Result<usize>;

    /// IDs of every chunk stored for `document_id`.
    async fn document_chunk_ids(&self, collection: &str, document_id: &str) -> Result<Vec<String>>;

    /// Replace all chunks of one document with `chunks`.
    ///
    /// Upserts the new chunks, then deletes chunk IDs of the same document
    /// that are no longer produced. Returns how many stale chunks were removed.
    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<usize> {
        let existing = self.document_chunk_ids(collection, document_id).await?;
        self.upsert(collection, chunks).await?;

        let keep: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<&str> =
            existing.iter().map(String::as_str).filter(|id| !keep.contains(id)).collect();
        if !stale.is_empty() {
            self.delete(collection, &stale).await?;
        }
        Ok(stale.len())
    }

    /// Make every buffered write durable.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
