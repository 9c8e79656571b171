//! Local vector store with optional on-disk persistence.
//!
//! [`LocalVectorStore`] keeps collections in a `HashMap` behind a
//! `tokio::sync::RwLock` and searches them exhaustively. When opened on a
//! directory, each collection is snapshotted to `<dir>/<collection>.json`;
//! writes are buffered until [`flush`](VectorStore::flush) and replace the
//! snapshot atomically (temp file + rename).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::distance::DistanceMetric;
use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "local";
const SNAPSHOT_EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    /// Insertion sequence number, used to break distance ties.
    seq: u64,
    chunk: Chunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Collection {
    metric: DistanceMetric,
    #[serde(default)]
    dimensions: Option<usize>,
    #[serde(default)]
    next_seq: u64,
    #[serde(default)]
    entries: HashMap<String, StoredChunk>,
}

impl Collection {
    fn new(metric: DistanceMetric) -> Self {
        Self { metric, dimensions: None, next_seq: 0, entries: HashMap::new() }
    }

    /// Validate a batch against the collection's dimension, returning the
    /// dimension the collection will have after the write.
    fn check_dimensions(&self, chunks: &[Chunk]) -> Result<Option<usize>> {
        let expected = self.dimensions.or_else(|| chunks.first().map(|c| c.embedding.len()));
        for chunk in chunks {
            if chunk.embedding.is_empty() {
                return Err(RagError::invalid_input(format!(
                    "chunk '{}' has no embedding",
                    chunk.id
                )));
            }
            if let Some(expected) = expected {
                if chunk.embedding.len() != expected {
                    return Err(RagError::DimensionMismatch {
                        expected,
                        actual: chunk.embedding.len(),
                    });
                }
            }
        }
        Ok(expected)
    }

    fn insert(&mut self, chunks: &[Chunk]) {
        for chunk in chunks {
            match self.entries.get_mut(&chunk.id) {
                Some(existing) => existing.chunk = chunk.clone(),
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    let stored = StoredChunk { seq, chunk: chunk.clone() };
                    self.entries.insert(chunk.id.clone(), stored);
                }
            }
        }
    }

    fn document_ids(&self, document_id: &str) -> Vec<String> {
        let mut owned: Vec<&StoredChunk> =
            self.entries.values().filter(|e| e.chunk.document_id == document_id).collect();
        owned.sort_by_key(|e| e.seq);
        owned.into_iter().map(|e| e.chunk.id.clone()).collect()
    }
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    /// Collections whose snapshot is out of date.
    dirty: HashSet<String>,
    /// Collections whose snapshot must be deleted.
    dropped: HashSet<String>,
}

impl State {
    fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.collections.get_mut(name).ok_or_else(|| missing_collection(name))
    }
}

fn missing_collection(name: &str) -> RagError {
    RagError::VectorStoreError {
        backend: BACKEND.to_string(),
        message: format!("collection '{name}' does not exist"),
    }
}

fn unavailable(path: &Path, action: &str, e: impl std::fmt::Display) -> RagError {
    RagError::StoreUnavailable {
        backend: BACKEND.to_string(),
        message: format!("failed to {action} '{}': {e}", path.display()),
    }
}

/// Collection names become file names, so keep them to a safe alphabet.
fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(RagError::invalid_input(format!(
            "collection name '{name}' must be non-empty and use only letters, digits, '_' or '-'"
        )));
    }
    Ok(())
}

/// A vector store held in memory, optionally persisted to a directory.
///
/// Search is exhaustive: every stored vector is compared with the query
/// under the collection's metric. Ties are broken by insertion order, and
/// overwriting a chunk keeps its original position.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::{DistanceMetric, LocalVectorStore, VectorStore};
///
/// let store = LocalVectorStore::open("./chroma_db").await?;
/// store.create_collection("docs", DistanceMetric::Cosine).await?;
/// ```
#[derive(Debug, Default)]
pub struct LocalVectorStore {
    root: Option<PathBuf>,
    state: RwLock<State>,
}

impl LocalVectorStore {
    /// Create an empty store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a persistent store under `dir`, loading every
    /// collection snapshot found there.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::StoreUnavailable`] if the directory cannot be
    /// created or read, or a snapshot cannot be parsed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await.map_err(|e| unavailable(&root, "create", e))?;

        let mut collections = HashMap::new();
        let mut entries =
            tokio::fs::read_dir(&root).await.map_err(|e| unavailable(&root, "read", e))?;
        while let Some(entry) =
            entries.next_entry().await.map_err(|e| unavailable(&root, "read", e))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let raw =
                tokio::fs::read_to_string(&path).await.map_err(|e| unavailable(&path, "read", e))?;
            let collection: Collection =
                serde_json::from_str(&raw).map_err(|e| unavailable(&path, "parse", e))?;
            debug!(collection = %name, entries = collection.entries.len(), "loaded collection");
            collections.insert(name, collection);
        }

        info!(path = %root.display(), collections = collections.len(), "opened local vector store");
        Ok(Self {
            root: Some(root),
            state: RwLock::new(State { collections, ..State::default() }),
        })
    }

    /// Whether there are writes that have not been flushed yet.
    pub async fn has_pending_writes(&self) -> bool {
        let state = self.state.read().await;
        self.root.is_some() && (!state.dirty.is_empty() || !state.dropped.is_empty())
    }

    fn snapshot_path(root: &Path, name: &str) -> PathBuf {
        root.join(format!("{name}.{SNAPSHOT_EXTENSION}"))
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(|e| unavailable(&tmp, "write", e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| unavailable(path, "replace", e))
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, metric: DistanceMetric) -> Result<()> {
        validate_collection_name(name)?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.collections.get(name) {
            if existing.metric != metric {
                return Err(RagError::ConfigError(format!(
                    "collection '{name}' uses the {} metric, not {metric}",
                    existing.metric
                )));
            }
            return Ok(());
        }
        state.collections.insert(name.to_string(), Collection::new(metric));
        state.dropped.remove(name);
        state.dirty.insert(name.to_string());
        debug!(collection = name, %metric, "created local collection");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.collections.remove(name).is_some() {
            state.dirty.remove(name);
            state.dropped.insert(name.to_string());
            debug!(collection = name, "deleted local collection");
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write().await;
        let store = state.collection_mut(collection)?;
        if chunks.is_empty() {
            return Ok(());
        }
        let dimensions = store.check_dimensions(chunks)?;
        store.insert(chunks);
        store.dimensions = dimensions;
        state.dirty.insert(collection.to_string());
        debug!(collection, count = chunks.len(), "upserted chunks");
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        let mut state = self.state.write().await;
        let store = state.collection_mut(collection)?;
        let mut removed = 0;
        for id in ids {
            if store.entries.remove(*id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            state.dirty.insert(collection.to_string());
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let state = self.state.read().await;
        let Some(store) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        if top_k == 0 || store.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = store.dimensions {
            if embedding.len() != expected {
                return Err(RagError::DimensionMismatch { expected, actual: embedding.len() });
            }
        }

        let mut scored: Vec<(f32, &StoredChunk)> = store
            .entries
            .values()
            .map(|entry| (store.metric.distance(&entry.chunk.embedding, embedding), entry))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.seq.cmp(&b.1.seq)));
        scored.truncate(top_k);
        Ok(scored
            .into_iter()
            .map(|(distance, entry)| SearchResult { chunk: entry.chunk.clone(), distance })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.collections.get(collection).map_or(0, |c| c.entries.len()))
    }

    async fn document_chunk_ids(&self, collection: &str, document_id: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .map(|c| c.document_ids(document_id))
            .unwrap_or_default())
    }

    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        let store = state.collection_mut(collection)?;
        let dimensions = store.check_dimensions(chunks)?;

        let keep: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = store
            .document_ids(document_id)
            .into_iter()
            .filter(|id| !keep.contains(id.as_str()))
            .collect();
        for id in &stale {
            store.entries.remove(id);
        }
        store.insert(chunks);
        if store.dimensions.is_none() {
            store.dimensions = dimensions;
        }
        state.dirty.insert(collection.to_string());
        Ok(stale.len())
    }

    async fn flush(&self) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let mut state = self.state.write().await;

        let dropped: Vec<String> = state.dropped.iter().cloned().collect();
        for name in dropped {
            let path = Self::snapshot_path(root, &name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(unavailable(&path, "remove", e)),
            }
            state.dropped.remove(&name);
        }

        let dirty: Vec<String> = state.dirty.iter().cloned().collect();
        for name in dirty {
            if let Some(collection) = state.collections.get(&name) {
                let path = Self::snapshot_path(root, &name);
                let bytes = serde_json::to_vec(collection)
                    .map_err(|e| unavailable(&path, "encode", e))?;
                write_atomic(&path, &bytes).await?;
                let entries = collection.entries.len();
                debug!(collection = %name, entries, "flushed collection");
            }
            state.dirty.remove(&name);
        }
        Ok(())
    }
}
