//! Document retrieval for question answering.
//!
//! This crate provides:
//! - Character-based recursive chunking with page provenance
//! - Pluggable embedding providers (feature hashing, fastembed, OpenAI)
//! - Vector stores with cosine, Euclidean and dot-product search
//! - Batch ingestion with per-document reports
//! - Query retrieval with optional topic weighting
//!
//! ## Feature flags
//!
//! | Feature | Enables |
//! |---|---|
//! | `pdf` | `PdfLoader` (lopdf) |
//! | `fastembed` | `FastEmbedProvider` (local ONNX models) |
//! | `openai` | `OpenAIEmbeddingProvider` and `OpenAICompatibleGenerator` |
//! | `qdrant` | `QdrantVectorStore` |
//! | `full` | all of the above |

pub mod chunking;
pub mod config;
pub mod distance;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod hash;
pub mod ingest;
pub mod loader;
pub mod local;
pub mod retrieval;
pub mod service;
pub mod vectorstore;

#[cfg(feature = "fastembed")]
pub mod fastembed;
#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker, split_text};
pub use config::{
    EmbedderConfig, GeneratorConfig, RagConfig, RagConfigBuilder, Settings, StoreConfig,
};
pub use distance::DistanceMetric;
pub use document::{Chunk, Document, Page, SearchResult, chunk_id};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use generation::{AnswerGenerator, GenerationRequest, format_context};
pub use hash::HashEmbeddingProvider;
pub use ingest::{
    DocumentOutcome, DocumentReport, IngestReport, IngestedDocument, IngestionPipeline,
};
pub use loader::{AutoLoader, DocumentLoader, TextLoader, discover_documents};
pub use local::LocalVectorStore;
pub use retrieval::{Retriever, compose_query};
pub use service::Services;
pub use vectorstore::VectorStore;

#[cfg(feature = "pdf")]
pub use loader::PdfLoader;
#[cfg(feature = "fastembed")]
pub use crate::fastembed::FastEmbedProvider;
#[cfg(feature = "openai")]
pub use generation::openai::OpenAICompatibleGenerator;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorStore;
