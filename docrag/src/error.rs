//! Error types for the `docrag` crate.

use thiserror::Error;

/// Errors that can occur in ingestion and retrieval.
#[derive(Debug, Error)]
pub enum RagError {
    /// Caller-supplied input was empty, out of range or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A vector's length disagrees with the dimension of its collection.
    #[error(
        "Dimension mismatch: collection expects {expected} dimensions, got {actual} \
         (re-ingest the collection with a consistent embedding model)"
    )]
    DimensionMismatch {
        /// The dimension established by the collection's first write.
        expected: usize,
        /// The dimension of the offending vector.
        actual: usize,
    },

    /// A source document could not be read or parsed.
    #[error("Failed to load document '{path}': {message}")]
    DocumentLoadFailure {
        /// The path of the document that failed to load.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// The persistence engine could not be reached or opened.
    #[error("Vector store unavailable ({backend}): {message}")]
    StoreUnavailable {
        /// The vector store backend that is unavailable.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The answer-generation service failed.
    #[error("Generation error ({provider}): {message}")]
    GenerationError {
        /// The generation backend that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Backends cannot be wired as configured: a blank collection or model
    /// name, an unknown model, a metric conflict or a missing cargo feature.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Shorthand for [`RagError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether the error was caused by the caller rather than a backend.
    ///
    /// Out-of-range sizes are [`InvalidInput`](Self::InvalidInput) whether
    /// they come from a request or from [`RagConfig`](crate::RagConfig);
    /// [`ConfigError`](Self::ConfigError) is a deployment problem.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::DimensionMismatch { .. })
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
