//! Configuration for ingestion, retrieval and backend selection.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{RagError, Result};

/// Configuration parameters for chunking and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of results to return when the caller does not ask for a specific count.
    pub top_k: usize,
    /// Distance metric new collections are created with.
    pub metric: DistanceMetric,
    /// Results farther than this distance are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f32>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 0,
            top_k: 4,
            metric: DistanceMetric::default(),
            max_distance: None,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if:
    /// - `chunk_size == 0`
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `max_distance` is negative or NaN
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::invalid_input("chunk_size must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::invalid_input(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::invalid_input("top_k must be greater than zero"));
        }
        if let Some(max) = self.max_distance {
            if max.is_nan() || max < 0.0 {
                return Err(RagError::invalid_input(format!(
                    "max_distance must be a non-negative number, got {max}"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the default number of results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the distance metric for newly created collections.
    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.config.metric = metric;
        self
    }

    /// Drop results farther than `distance` from the query.
    pub fn max_distance(mut self, distance: f32) -> Self {
        self.config.max_distance = Some(distance);
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Environment variables read by [`Settings::from_env`].
pub mod vars {
    /// Collection name.
    pub const COLLECTION: &str = "DOCRAG_COLLECTION";
    /// Fallback for [`COLLECTION`] used by older deployments.
    pub const LEGACY_COLLECTION: &str = "COLLECTION_NAME";
    /// Maximum chunk size in characters.
    pub const CHUNK_SIZE: &str = "DOCRAG_CHUNK_SIZE";
    /// Overlap between consecutive chunks.
    pub const CHUNK_OVERLAP: &str = "DOCRAG_CHUNK_OVERLAP";
    /// Default number of retrieved chunks.
    pub const TOP_K: &str = "DOCRAG_TOP_K";
    /// Distance metric for new collections.
    pub const METRIC: &str = "DOCRAG_METRIC";
    /// Results farther than this are dropped.
    pub const MAX_DISTANCE: &str = "DOCRAG_MAX_DISTANCE";
    /// Directory of the local store.
    pub const STORE_PATH: &str = "DOCRAG_STORE_PATH";
    /// Qdrant gRPC URL; selects the Qdrant store when set.
    pub const QDRANT_URL: &str = "DOCRAG_QDRANT_URL";
    /// `hash`, `fastembed` or `openai`.
    pub const EMBEDDER: &str = "DOCRAG_EMBEDDER";
    /// Model for the fastembed or OpenAI embedder.
    pub const EMBEDDING_MODEL: &str = "DOCRAG_EMBEDDING_MODEL";
    /// Output dimensions of the hash or OpenAI embedder.
    pub const EMBEDDING_DIMENSIONS: &str = "DOCRAG_EMBEDDING_DIMENSIONS";
    /// Base URL of an OpenAI-compatible embeddings server.
    pub const EMBEDDING_BASE_URL: &str = "DOCRAG_EMBEDDING_BASE_URL";
    /// Base URL of an OpenAI-compatible chat server; enables generation.
    pub const LLM_BASE_URL: &str = "DOCRAG_LLM_BASE_URL";
    /// Chat model name.
    pub const LLM_MODEL: &str = "DOCRAG_LLM_MODEL";
    /// Bearer token for the chat server.
    pub const API_KEY: &str = "OPENAI_API_KEY";
}

const DEFAULT_FASTEMBED_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_LLM_MODEL: &str = "llama-2-13b-chat";

/// Which embedding backend to construct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbedderConfig {
    /// Deterministic feature-hashing embedder, no model download.
    Hash {
        /// Output dimensionality.
        dimensions: usize,
    },
    /// Local ONNX sentence-transformer via fastembed.
    FastEmbed {
        /// Model identifier, e.g. `all-MiniLM-L6-v2`.
        model: String,
    },
    /// OpenAI (or compatible) embeddings API.
    #[serde(rename = "openai")]
    OpenAI {
        /// Model identifier, e.g. `text-embedding-3-small`.
        model: String,
        /// Optional Matryoshka dimension override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dimensions: Option<usize>,
        /// Optional base URL for OpenAI-compatible servers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
    },
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self::Hash { dimensions: crate::hash::DEFAULT_DIMENSIONS }
    }
}

/// Which vector store backend to open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Ephemeral in-process store.
    Memory,
    /// JSON snapshots under a local directory.
    Local {
        /// Directory holding one file per collection.
        path: PathBuf,
    },
    /// Remote Qdrant server.
    Qdrant {
        /// gRPC URL, e.g. `http://localhost:6334`.
        url: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Local { path: PathBuf::from("./chroma_db") }
    }
}

/// Connection parameters for an OpenAI-compatible chat completions server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorConfig {
    /// API base URL, up to and including `/v1`.
    pub base_url: String,
    /// Model name; also the engine name the UI selects.
    pub model: String,
    /// Bearer token. Local servers often accept any value.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

/// Everything needed to wire up the services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// The collection ingestion writes to and retrieval reads from.
    pub collection: String,
    /// Chunking and retrieval parameters.
    pub rag: RagConfig,
    /// Embedding backend.
    pub embedder: EmbedderConfig,
    /// Vector store backend.
    pub store: StoreConfig,
    /// Optional answer generator. Retrieval-only when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            collection: "documents".to_string(),
            rag: RagConfig::default(),
            embedder: EmbedderConfig::default(),
            store: StoreConfig::default(),
            generator: None,
        }
    }
}

impl Settings {
    /// Validate the settings as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] for out-of-range sizes (see
    /// [`RagConfig::validate`], or a zero-dimension embedder) and
    /// [`RagError::ConfigError`] for an empty collection or model name.
    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(RagError::ConfigError("collection name must not be empty".to_string()));
        }
        self.rag.validate()?;
        match &self.embedder {
            EmbedderConfig::Hash { dimensions: 0 } => Err(RagError::invalid_input(
                "hash embedder dimensions must be greater than zero",
            )),
            EmbedderConfig::OpenAI { dimensions: Some(0), .. } => Err(RagError::invalid_input(
                "embedding dimensions must be greater than zero",
            )),
            EmbedderConfig::FastEmbed { model } | EmbedderConfig::OpenAI { model, .. }
                if model.trim().is_empty() =>
            {
                Err(RagError::ConfigError("embedding model must not be empty".to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl Settings {
    /// Assemble settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_lookup`](Self::from_lookup).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Assemble settings from the variables in [`vars`], resolved by `lookup`.
    ///
    /// Unset or blank variables take their defaults. The result is not
    /// validated; [`Services::init`](crate::Services::init) does that.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for a value that does not parse or
    /// an unknown embedder kind.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let defaults = RagConfig::default();

        let rag = RagConfig {
            chunk_size: parse_var(vars::CHUNK_SIZE, get(vars::CHUNK_SIZE))?
                .unwrap_or(defaults.chunk_size),
            chunk_overlap: parse_var(vars::CHUNK_OVERLAP, get(vars::CHUNK_OVERLAP))?
                .unwrap_or(defaults.chunk_overlap),
            top_k: parse_var(vars::TOP_K, get(vars::TOP_K))?.unwrap_or(defaults.top_k),
            metric: parse_var(vars::METRIC, get(vars::METRIC))?.unwrap_or(defaults.metric),
            max_distance: parse_var(vars::MAX_DISTANCE, get(vars::MAX_DISTANCE))?,
        };

        let store = match (get(vars::QDRANT_URL), get(vars::STORE_PATH)) {
            (Some(url), _) => StoreConfig::Qdrant { url },
            (None, Some(path)) => StoreConfig::Local { path: PathBuf::from(path) },
            (None, None) => StoreConfig::default(),
        };

        let model = get(vars::EMBEDDING_MODEL);
        let dimensions = parse_var(vars::EMBEDDING_DIMENSIONS, get(vars::EMBEDDING_DIMENSIONS))?;
        let kind = get(vars::EMBEDDER).map(|kind| kind.to_ascii_lowercase());
        let embedder = match kind.as_deref() {
            None | Some("hash") => EmbedderConfig::Hash {
                dimensions: dimensions.unwrap_or(crate::hash::DEFAULT_DIMENSIONS),
            },
            Some("fastembed") => EmbedderConfig::FastEmbed {
                model: model.unwrap_or_else(|| DEFAULT_FASTEMBED_MODEL.to_string()),
            },
            Some("openai") => EmbedderConfig::OpenAI {
                model: model.unwrap_or_else(|| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string()),
                dimensions,
                base_url: get(vars::EMBEDDING_BASE_URL),
            },
            Some(other) => {
                return Err(RagError::ConfigError(format!(
                    "unknown {} '{other}', expected hash, fastembed or openai",
                    vars::EMBEDDER
                )));
            }
        };

        let generator = get(vars::LLM_BASE_URL).map(|base_url| GeneratorConfig {
            base_url,
            model: get(vars::LLM_MODEL).unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            api_key: get(vars::API_KEY),
        });

        let collection = get(vars::COLLECTION)
            .or_else(|| get(vars::LEGACY_COLLECTION))
            .unwrap_or_else(|| Settings::default().collection);

        Ok(Self { collection, rag, embedder, store, generator })
    }
}

fn parse_var<T>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|raw| {
        raw.parse::<T>()
            .map_err(|e| RagError::ConfigError(format!("invalid {name} '{raw}': {e}")))
    })
    .transpose()
}
