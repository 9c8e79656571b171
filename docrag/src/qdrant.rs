//! Qdrant vector store backend.
//!
//! Provides [`QdrantVectorStore`] which implements [`VectorStore`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//!
//! Qdrant only accepts UUIDs or integers as point IDs, so each chunk is
//! stored under the UUIDv5 of its chunk ID and the original ID travels in
//! the payload. A Qdrant collection needs its vector size up front, so
//! [`create_collection`](VectorStore::create_collection) only records the
//! metric and the collection is created on the first upsert.
//!
//! # Example
//!
//! ```rust,ignore
//! use docrag::qdrant::QdrantVectorStore;
//!
//! let store = QdrantVectorStore::new("http://localhost:6334")?;
//! store.create_collection("docs", DistanceMetric::Cosine).await?;
//! store.upsert("docs", &chunks).await?;
//! let results = store.search("docs", &query_embedding, 5).await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter, PointId, PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use crate::distance::DistanceMetric;
use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: u32 = 256;

/// Derive the Qdrant point ID for a chunk ID.
pub fn point_uuid(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

fn to_qdrant_distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Euclidean => Distance::Euclid,
        DistanceMetric::DotProduct => Distance::Dot,
    }
}

fn from_qdrant_distance(distance: Distance) -> Option<DistanceMetric> {
    match distance {
        Distance::Cosine => Some(DistanceMetric::Cosine),
        Distance::Euclid => Some(DistanceMetric::Euclidean),
        Distance::Dot => Some(DistanceMetric::DotProduct),
        _ => None,
    }
}

/// gRPC status codes `DEADLINE_EXCEEDED` and `UNAVAILABLE`.
const UNREACHABLE_CODES: [i32; 2] = [4, 14];

/// Whether a transport error text means the server could not be reached.
fn is_connect_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["connect error", "connection refused", "transport error", "dns error", "broken pipe"]
        .iter()
        .any(|marker| message.contains(marker))
}

/// Whether `e` means the server is down rather than that the request was bad.
fn is_unreachable(e: &QdrantError) -> bool {
    match e {
        QdrantError::ResponseError { status, .. } => {
            UNREACHABLE_CODES.contains(&(status.code() as i32))
                || is_connect_failure(status.message())
        }
        other => is_connect_failure(&other.to_string()),
    }
}

/// Convert a Qdrant score into a distance (lower is closer).
fn score_to_distance(metric: DistanceMetric, score: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - score,
        DistanceMetric::Euclidean => score,
        DistanceMetric::DotProduct => -score,
    }
}

/// A [`VectorStore`] backed by [Qdrant](https://qdrant.tech/).
///
/// Chunk text, document ID, page, index and metadata are stored as payload.
/// Ties in distance are ordered by Qdrant, not by insertion order.
pub struct QdrantVectorStore {
    client: Qdrant,
    /// Collections announced by `create_collection` but not yet created.
    pending: RwLock<HashMap<String, DistanceMetric>>,
}

impl QdrantVectorStore {
    /// Create a new Qdrant vector store connecting to the given URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(|e| RagError::StoreUnavailable {
            backend: BACKEND.to_string(),
            message: format!("failed to connect to {url}: {e}"),
        })?;
        Ok(Self::from_client(client))
    }

    /// Create a new Qdrant vector store from an existing client.
    pub fn from_client(client: Qdrant) -> Self {
        Self { client, pending: RwLock::new(HashMap::new()) }
    }

    fn map_err(e: QdrantError) -> RagError {
        if is_unreachable(&e) {
            error!(backend = BACKEND, error = %e, "qdrant server unreachable");
            return RagError::StoreUnavailable {
                backend: BACKEND.to_string(),
                message: e.to_string(),
            };
        }
        error!(backend = BACKEND, error = %e, "qdrant request failed");
        RagError::VectorStoreError { backend: BACKEND.to_string(), message: e.to_string() }
    }

    /// Vector size and metric of an existing collection, or `None`.
    async fn collection_params(&self, name: &str) -> Result<Option<(usize, DistanceMetric)>> {
        if !self.client.collection_exists(name).await.map_err(Self::map_err)? {
            return Ok(None);
        }
        let info = self.client.collection_info(name).await.map_err(Self::map_err)?;
        let params = info
            .result
            .and_then(|info| info.config)
            .and_then(|config| config.params)
            .and_then(|params| params.vectors_config)
            .and_then(|vectors| vectors.config);
        match params {
            Some(VectorsConfigKind::Params(params)) => {
                let metric = from_qdrant_distance(params.distance()).ok_or_else(|| {
                    RagError::ConfigError(format!(
                        "collection '{name}' uses an unsupported qdrant distance"
                    ))
                })?;
                Ok(Some((params.size as usize, metric)))
            }
            _ => Err(RagError::ConfigError(format!(
                "collection '{name}' does not use a single unnamed vector"
            ))),
        }
    }

    fn extract_string(value: &QdrantValue) -> Option<String> {
        match &value.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn extract_integer(value: &QdrantValue) -> Option<i64> {
        match &value.kind {
            Some(Kind::IntegerValue(n)) => Some(*n),
            Some(Kind::DoubleValue(n)) => Some(*n as i64),
            _ => None,
        }
    }

    fn payload_for(chunk: &Chunk) -> Result<Payload> {
        let metadata: serde_json::Map<String, serde_json::Value> = chunk
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let mut payload = serde_json::json!({
            "chunk_id": chunk.id,
            "text": chunk.text,
            "document_id": chunk.document_id,
            "index": chunk.index,
            "metadata": metadata,
        });
        if let Some(page) = chunk.page {
            payload["page"] = serde_json::Value::from(page);
        }
        Payload::try_from(payload).map_err(|e| RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("invalid payload for chunk '{}': {e}", chunk.id),
        })
    }

    fn chunk_from_payload(payload: &HashMap<String, QdrantValue>) -> Chunk {
        let string = |key: &str| payload.get(key).and_then(Self::extract_string);
        let metadata = payload
            .get("metadata")
            .and_then(|v| match &v.kind {
                Some(Kind::StructValue(s)) => Some(
                    s.fields
                        .iter()
                        .filter_map(|(k, v)| Self::extract_string(v).map(|s| (k.clone(), s)))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();

        Chunk {
            id: string("chunk_id").unwrap_or_default(),
            text: string("text").unwrap_or_default(),
            embedding: vec![],
            metadata,
            document_id: string("document_id").unwrap_or_default(),
            page: payload
                .get("page")
                .and_then(Self::extract_integer)
                .and_then(|n| u32::try_from(n).ok()),
            index: payload
                .get("index")
                .and_then(Self::extract_integer)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, metric: DistanceMetric) -> Result<()> {
        if let Some((_, existing)) = self.collection_params(name).await? {
            if existing != metric {
                return Err(RagError::ConfigError(format!(
                    "collection '{name}' uses the {existing} metric, not {metric}"
                )));
            }
            debug!(collection = name, "qdrant collection already exists, skipping creation");
            return Ok(());
        }

        let mut pending = self.pending.write().await;
        match pending.get(name) {
            Some(existing) if *existing != metric => Err(RagError::ConfigError(format!(
                "collection '{name}' uses the {existing} metric, not {metric}"
            ))),
            _ => {
                pending.insert(name.to_string(), metric);
                Ok(())
            }
        }
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.pending.write().await.remove(name);
        if self.client.collection_exists(name).await.map_err(Self::map_err)? {
            self.client.delete_collection(name).await.map_err(Self::map_err)?;
            debug!(collection = name, "deleted qdrant collection");
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        let existing = self.collection_params(collection).await?;
        let pending_metric = self.pending.read().await.get(collection).copied();
        if existing.is_none() && pending_metric.is_none() {
            return Err(RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!("collection '{collection}' does not exist"),
            });
        }
        let Some(first) = chunks.first() else {
            return Ok(());
        };

        let expected = existing.map_or(first.embedding.len(), |(size, _)| size);
        for chunk in chunks {
            if chunk.embedding.is_empty() {
                return Err(RagError::invalid_input(format!(
                    "chunk '{}' has no embedding",
                    chunk.id
                )));
            }
            if chunk.embedding.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: chunk.embedding.len(),
                });
            }
        }

        if existing.is_none() {
            if let Some(metric) = pending_metric {
                self.client
                    .create_collection(CreateCollectionBuilder::new(collection).vectors_config(
                        VectorParamsBuilder::new(expected as u64, to_qdrant_distance(metric)),
                    ))
                    .await
                    .map_err(Self::map_err)?;
                self.pending.write().await.remove(collection);
                debug!(collection, dimensions = expected, %metric, "created qdrant collection");
            }
        }

        let points = chunks
            .iter()
            .map(|chunk| {
                Ok(PointStruct::new(
                    point_uuid(&chunk.id).to_string(),
                    chunk.embedding.clone(),
                    Self::payload_for(chunk)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(Self::map_err)?;

        debug!(collection, count = chunks.len(), "upserted chunks to qdrant");
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let point_ids: Vec<PointId> =
            ids.iter().map(|id| point_uuid(id).to_string().into()).collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(Self::map_err)?;

        debug!(collection, count = ids.len(), "deleted points from qdrant");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let Some((size, metric)) = self.collection_params(collection).await? else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if embedding.len() != size {
            return Err(RagError::DimensionMismatch { expected: size, actual: embedding.len() });
        }

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, embedding.to_vec(), top_k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(Self::map_err)?;

        let mut results: Vec<SearchResult> = response
            .result
            .into_iter()
            .map(|scored| SearchResult {
                chunk: Self::chunk_from_payload(&scored.payload),
                distance: score_to_distance(metric, scored.score),
            })
            .collect();
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        if !self.client.collection_exists(collection).await.map_err(Self::map_err)? {
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await
            .map_err(Self::map_err)?;
        Ok(response.result.map_or(0, |r| r.count as usize))
    }

    async fn document_chunk_ids(&self, collection: &str, document_id: &str) -> Result<Vec<String>> {
        if !self.client.collection_exists(collection).await.map_err(Self::map_err)? {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(collection)
                .filter(Filter::must([Condition::matches("document_id", document_id.to_string())]))
                .with_payload(true)
                .with_vectors(false)
                .limit(SCROLL_PAGE);
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }
            let response = self.client.scroll(request).await.map_err(Self::map_err)?;
            ids.extend(
                response
                    .result
                    .iter()
                    .filter_map(|point| {
                        point.payload.get("chunk_id").and_then(Self::extract_string)
                    }),
            );
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failures_are_recognised() {
        assert!(is_connect_failure(
            "error trying to connect: tcp connect error: Connection refused (os error 111)"
        ));
        assert!(is_connect_failure("status: Unknown, message: \"transport error\""));
        assert!(!is_connect_failure("Not found: Collection `docs` doesn't exist!"));
    }

    #[tokio::test]
    async fn unreachable_server_reports_store_unavailable() {
        // Nothing listens on the discard port, so every request is refused.
        let store = QdrantVectorStore::new("http://127.0.0.1:9").unwrap();

        let counted = store.count("docs").await;
        assert!(
            matches!(
                counted,
                Err(RagError::StoreUnavailable { ref backend, .. }) if backend == "qdrant"
            ),
            "unexpected count result: {counted:?}"
        );

        let created = store.create_collection("docs", DistanceMetric::Cosine).await;
        assert!(matches!(created, Err(RagError::StoreUnavailable { .. })), "{created:?}");
    }

    #[test]
    fn point_ids_are_stable_uuids() {
        assert_eq!(point_uuid("manual.pdf_0"), point_uuid("manual.pdf_0"));
        assert_ne!(point_uuid("manual.pdf_0"), point_uuid("manual.pdf_1"));
        assert_eq!(point_uuid("x").get_version_num(), 5);
    }

    #[test]
    fn scores_convert_to_ascending_distances() {
        assert!((score_to_distance(DistanceMetric::Cosine, 0.9) - 0.1).abs() < 1e-6);
        assert_eq!(score_to_distance(DistanceMetric::Euclidean, 2.5), 2.5);
        assert_eq!(score_to_distance(DistanceMetric::DotProduct, 3.0), -3.0);
    }

    #[test]
    fn metrics_map_both_ways() {
        let metrics = [DistanceMetric::Cosine, DistanceMetric::Euclidean, DistanceMetric::DotProduct];
        for metric in metrics {
            assert_eq!(from_qdrant_distance(to_qdrant_distance(metric)), Some(metric));
        }
    }

    #[test]
    fn payload_round_trips_chunk_fields() {
        let chunk = Chunk {
            id: "a.pdf_3".into(),
            text: "hello".into(),
            embedding: vec![1.0],
            metadata: HashMap::from([("source".to_string(), "a.pdf".to_string())]),
            document_id: "a.pdf".into(),
            page: Some(2),
            index: 3,
        };
        let payload: HashMap<String, QdrantValue> =
            QdrantVectorStore::payload_for(&chunk).unwrap().into();
        let restored = QdrantVectorStore::chunk_from_payload(&payload);
        assert_eq!(restored, Chunk { embedding: vec![], ..chunk });
    }
}
