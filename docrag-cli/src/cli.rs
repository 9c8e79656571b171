use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use docrag::config::vars;
use docrag::{DistanceMetric, Settings};

#[derive(Parser, Debug)]
#[command(name = "docrag", version, about = "Ingest documents and answer questions over them")]
pub struct Cli {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chunk, embed and store files or directories of files
    Ingest {
        /// Files to ingest, or directories to search recursively
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// File extensions picked up from directories (defaults to every supported type)
        #[arg(long, value_delimiter = ',')]
        extensions: Vec<String>,
    },
    /// Print the chunks closest to a question
    Query {
        /// The question to search for
        question: String,

        /// Number of chunks to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Topic prepended to the question before embedding
        #[arg(long)]
        topic_weight: Option<String>,

        /// Drop chunks farther than this distance
        #[arg(long)]
        max_distance: Option<f32>,

        /// Print results as JSON
        #[arg(long, default_value_t = false)]
        json_output: bool,
    },
    /// Run the HTTP API and UI
    Serve {
        #[arg(long, env = "DOCRAG_HOST", default_value = "127.0.0.1")]
        host: String,

        #[arg(long, env = "DOCRAG_PORT", default_value_t = 8100)]
        port: u16,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbedderKind {
    /// Feature hashing, works offline
    Hash,
    /// Local ONNX model via fastembed
    Fastembed,
    /// OpenAI embeddings API
    Openai,
}

impl EmbedderKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Fastembed => "fastembed",
            Self::Openai => "openai",
        }
    }
}

/// Flags overriding the variables `docrag-server` reads.
///
/// Every flag maps onto one of [`docrag::config::vars`], so the CLI and the
/// server build [`Settings`] through the same code.
#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Collection to ingest into and query (falls back to COLLECTION_NAME)
    #[arg(long, global = true, env = vars::COLLECTION)]
    pub collection: Option<String>,

    /// Directory for the local vector store [default: ./chroma_db]
    #[arg(long, global = true, env = vars::STORE_PATH)]
    pub store_path: Option<PathBuf>,

    /// Use a Qdrant server instead of the local store
    #[arg(long, global = true, env = vars::QDRANT_URL)]
    pub qdrant_url: Option<String>,

    /// Embedding backend [default: hash]
    #[arg(long, global = true, env = vars::EMBEDDER, value_enum)]
    pub embedder: Option<EmbedderKind>,

    /// Model for the fastembed or OpenAI embedder
    #[arg(long, global = true, env = vars::EMBEDDING_MODEL)]
    pub embedding_model: Option<String>,

    /// Output dimensions of the hash or OpenAI embedder
    #[arg(long, global = true, env = vars::EMBEDDING_DIMENSIONS)]
    pub embedding_dimensions: Option<usize>,

    /// OpenAI-compatible embeddings server
    #[arg(long, global = true, env = vars::EMBEDDING_BASE_URL)]
    pub embedding_base_url: Option<String>,

    /// Maximum chunk size in characters [default: 1000]
    #[arg(long, global = true, env = vars::CHUNK_SIZE)]
    pub chunk_size: Option<usize>,

    /// Characters shared by consecutive chunks [default: 0]
    #[arg(long, global = true, env = vars::CHUNK_OVERLAP)]
    pub chunk_overlap: Option<usize>,

    /// Default number of chunks retrieved per question [default: 4]
    #[arg(long, global = true, env = vars::TOP_K)]
    pub default_top_k: Option<usize>,

    /// Distance metric for new collections: cosine, euclidean or dot [default: cosine]
    #[arg(long, global = true, env = vars::METRIC)]
    pub metric: Option<DistanceMetric>,

    /// OpenAI-compatible chat API used to answer questions
    #[arg(long, global = true, env = vars::LLM_BASE_URL)]
    pub llm_base_url: Option<String>,

    /// Chat model name [default: llama-2-13b-chat]
    #[arg(long, global = true, env = vars::LLM_MODEL)]
    pub llm_model: Option<String>,

    #[arg(long, global = true, env = vars::API_KEY, hide_env_values = true)]
    pub api_key: Option<String>,
}

impl SettingsArgs {
    /// Build settings with these flags in place of the matching variables.
    pub fn to_settings(&self) -> docrag::Result<Settings> {
        Settings::from_lookup(|name| self.value_of(name).or_else(|| std::env::var(name).ok()))
    }

    fn value_of(&self, name: &str) -> Option<String> {
        fn text<T: ToString>(value: &Option<T>) -> Option<String> {
            value.as_ref().map(ToString::to_string)
        }
        match name {
            vars::COLLECTION => self.collection.clone(),
            vars::STORE_PATH => self.store_path.as_ref().map(|p| p.display().to_string()),
            vars::QDRANT_URL => self.qdrant_url.clone(),
            vars::EMBEDDER => self.embedder.map(|kind| kind.as_str().to_string()),
            vars::EMBEDDING_MODEL => self.embedding_model.clone(),
            vars::EMBEDDING_DIMENSIONS => text(&self.embedding_dimensions),
            vars::EMBEDDING_BASE_URL => self.embedding_base_url.clone(),
            vars::CHUNK_SIZE => text(&self.chunk_size),
            vars::CHUNK_OVERLAP => text(&self.chunk_overlap),
            vars::TOP_K => text(&self.default_top_k),
            vars::METRIC => text(&self.metric),
            vars::LLM_BASE_URL => self.llm_base_url.clone(),
            vars::LLM_MODEL => self.llm_model.clone(),
            vars::API_KEY => self.api_key.clone(),
            _ => None,
        }
    }
}
