//! Deterministic feature-hashing embeddings.
//!
//! [`HashEmbeddingProvider`] needs no model download or network access: each
//! lowercase alphanumeric token is hashed with FNV-1a into a signed bucket and
//! the resulting bag-of-words vector is L2-normalised. Texts sharing words end
//! up close under cosine distance, which is enough for offline use and tests.

use async_trait::async_trait;

use crate::distance::l2_normalize;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// Default output dimensionality, matching `all-MiniLM-L6-v2`.
pub const DEFAULT_DIMENSIONS: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// An [`EmbeddingProvider`] built on the hashing trick.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::HashEmbeddingProvider;
///
/// let provider = HashEmbeddingProvider::new(256);
/// let a = provider.embed("pricing of the pro plan").await?;
/// let b = provider.embed("pricing of the pro plan").await?;
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
    model_id: String,
}

impl HashEmbeddingProvider {
    /// Create a provider producing `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, model_id: format!("hash-fnv1a-{dimensions}") }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }
        l2_normalize(&mut embedding);
        embedding
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    #[tokio::test]
    async fn embeddings_are_deterministic_and_sized() {
        let provider = HashEmbeddingProvider::new(64);
        let a = provider.embed("The quick brown fox").await.unwrap();
        let b = HashEmbeddingProvider::new(64).embed("The quick brown fox").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_eq!(provider.model_id(), "hash-fnv1a-64");
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let provider = HashEmbeddingProvider::new(32);
        let texts = ["alpha", "beta", "gamma"];
        let batch = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(vector, &provider.embed(text).await.unwrap());
        }
    }

    #[tokio::test]
    async fn shared_words_are_closer_than_unrelated_text() {
        let provider = HashEmbeddingProvider::default();
        let query = provider.embed("How much does the pro plan cost?").await.unwrap();
        let related = provider.embed("The pro plan cost is 20 dollars").await.unwrap();
        let unrelated = provider.embed("Penguins live in Antarctica").await.unwrap();
        let metric = DistanceMetric::Cosine;
        assert!(metric.distance(&query, &related) < metric.distance(&query, &unrelated));
    }

    #[tokio::test]
    async fn case_and_punctuation_are_ignored() {
        let provider = HashEmbeddingProvider::new(16);
        let a = provider.embed("Hello, World!").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }
}
