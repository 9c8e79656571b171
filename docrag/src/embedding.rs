//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (feature hashing,
/// fastembed, OpenAI, ...) behind a unified async interface. An embedding
/// must depend only on the input text and [`model_id`](EmbeddingProvider::model_id):
/// the same provider is used at ingestion and at query time.
///
/// The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::EmbeddingProvider;
///
/// let provider = HashEmbeddingProvider::new(384);
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The output has one vector per input, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the model behind this provider.
    fn model_id(&self) -> &str;
}

/// Check that a batch response lines up with its request.
pub(crate) fn check_batch_len(provider: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(RagError::EmbeddingError {
            provider: provider.to_string(),
            message: format!("expected {expected} embeddings, got {actual}"),
        });
    }
    Ok(())
}
