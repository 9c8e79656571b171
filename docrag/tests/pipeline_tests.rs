//! End-to-end ingestion and retrieval over the local store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docrag::{
    Chunk, DistanceMetric, Document, DocumentOutcome, EmbeddingProvider, HashEmbeddingProvider,
    IngestionPipeline, LocalVectorStore, Page, RagConfig, RagError, Result, Retriever,
    SearchResult, VectorStore,
};

const COLLECTION: &str = "docs";

/// A paragraph of roughly 600 characters about `topic`.
fn paragraph(topic: &str) -> String {
    let sentence = format!("This section covers {topic} in detail. ");
    sentence.repeat(600 / sentence.len() + 1).trim_end().to_string()
}

/// Three pages, seven paragraphs: no two paragraphs fit in one 1000-character chunk.
fn manual() -> Document {
    let page = |topics: &[&str]| {
        topics.iter().map(|t| paragraph(t)).collect::<Vec<_>>().join("\n\n")
    };
    Document::new(
        "manual.pdf",
        vec![
            Page::new(1, page(&["installation", "billing", "accounts"])),
            Page::new(2, page(&["pricing", "support"])),
            Page::new(3, page(&["security", "backups"])),
        ],
    )
}

/// Records every text it embeds.
#[derive(Default)]
struct RecordingEmbedder {
    inner: HashEmbeddingProvider,
    seen: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.seen.lock().unwrap().push(text.to_string());
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

/// Returns one vector too few for every batch.
struct ShortBatchEmbedder(HashEmbeddingProvider);

#[async_trait]
impl EmbeddingProvider for ShortBatchEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.0.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut all = self.0.embed_batch(texts).await?;
        all.pop();
        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.0.dimensions()
    }

    fn model_id(&self) -> &str {
        "short-batch"
    }
}

/// Counts flushes and goes down after a fixed number of document writes.
struct FlakyStore {
    inner: LocalVectorStore,
    flushes: AtomicUsize,
    writes: AtomicUsize,
    writes_before_outage: usize,
}

impl FlakyStore {
    fn new(writes_before_outage: usize) -> Self {
        Self {
            inner: LocalVectorStore::in_memory(),
            flushes: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            writes_before_outage,
        }
    }

    fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn backend(&self) -> &str {
        "flaky"
    }

    async fn create_collection(&self, name: &str, metric: DistanceMetric) -> Result<()> {
        self.inner.create_collection(name, metric).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.inner.delete_collection(name).await
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        self.inner.upsert(collection, chunks).await
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        self.inner.delete(collection, ids).await
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.inner.search(collection, embedding, top_k).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection).await
    }

    async fn document_chunk_ids(&self, collection: &str, document_id: &str) -> Result<Vec<String>> {
        self.inner.document_chunk_ids(collection, document_id).await
    }

    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<usize> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.writes_before_outage {
            return Err(RagError::StoreUnavailable {
                backend: "flaky".into(),
                message: "connection refused".into(),
            });
        }
        self.inner.replace_document(collection, document_id, chunks).await
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

fn pipeline(
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
) -> IngestionPipeline {
    IngestionPipeline::builder()
        .config(RagConfig::default())
        .embedding_provider(embedder)
        .vector_store(store)
        .build()
        .unwrap()
}

fn chunks_written(outcome: &DocumentOutcome) -> usize {
    match outcome {
        DocumentOutcome::Ingested { chunks, .. } => *chunks,
        DocumentOutcome::Failed { error } => panic!("document failed: {error}"),
    }
}

#[tokio::test]
async fn three_page_manual_is_retrieved_with_provenance() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    let report =
        pipeline(embedder.clone(), store.clone()).ingest_documents(COLLECTION, &[manual()]).await.unwrap();

    assert_eq!(report.total_chunks(), 7);
    assert_eq!(chunks_written(&report.documents[0].outcome), 7);
    assert_eq!(store.count(COLLECTION).await.unwrap(), 7);

    let retriever = Retriever::new(RagConfig::default(), embedder, store);
    let results = retriever.retrieve(COLLECTION, "How does billing work?", 3, None).await.unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].chunk.text.contains("billing"));
    assert_eq!(results[0].chunk.page, Some(1));
    for result in &results {
        assert_eq!(result.chunk.document_id, "manual.pdf");
        assert!(result.chunk.page.is_some());
    }
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[tokio::test]
async fn topic_weight_is_embedded_with_the_question() {
    let embedder = Arc::new(RecordingEmbedder::default());
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    pipeline(embedder.clone(), store.clone()).ingest_documents(COLLECTION, &[manual()]).await.unwrap();

    let retriever = Retriever::new(RagConfig::default(), embedder.clone(), store);
    retriever.retrieve(COLLECTION, "What is the cost?", 3, Some("pricing")).await.unwrap();

    assert_eq!(
        embedder.seen().last().map(String::as_str),
        Some("Topic: pricing Question: What is the cost?")
    );
}

#[tokio::test]
async fn empty_collection_returns_nothing_without_embedding() {
    let embedder = Arc::new(RecordingEmbedder::default());
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    let retriever = Retriever::new(RagConfig::default(), embedder.clone(), store);

    let results = retriever.retrieve(COLLECTION, "anything", 4, None).await.unwrap();
    assert!(results.is_empty());
    assert!(embedder.seen().is_empty());
}

#[tokio::test]
async fn blank_queries_are_rejected_and_k_is_clamped() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    pipeline(embedder.clone(), store.clone()).ingest_documents(COLLECTION, &[manual()]).await.unwrap();
    let retriever = Retriever::new(RagConfig::default(), embedder, store);

    let err = retriever.retrieve(COLLECTION, "   ", 3, None).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));

    assert_eq!(retriever.retrieve(COLLECTION, "backups", 0, None).await.unwrap().len(), 1);
    assert_eq!(retriever.retrieve(COLLECTION, "backups", 100, None).await.unwrap().len(), 7);
    assert_eq!(retriever.query(COLLECTION, "backups").await.unwrap().len(), 4);
}

#[tokio::test]
async fn max_distance_drops_far_results() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    pipeline(embedder.clone(), store.clone()).ingest_documents(COLLECTION, &[manual()]).await.unwrap();

    let config = RagConfig::builder().max_distance(0.0).build().unwrap();
    let retriever = Retriever::new(config, embedder, store);
    let results = retriever.retrieve(COLLECTION, "quantum chromodynamics", 7, None).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn reingesting_is_idempotent() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    let pipeline = pipeline(embedder, store.clone());

    pipeline.ingest_document(COLLECTION, &manual()).await.unwrap();
    let first = store.document_chunk_ids(COLLECTION, "manual.pdf").await.unwrap();
    let again = pipeline.ingest_document(COLLECTION, &manual()).await.unwrap();
    let second = store.document_chunk_ids(COLLECTION, "manual.pdf").await.unwrap();

    assert_eq!(again.removed, 0);
    assert_eq!(first, second);
    assert_eq!(store.count(COLLECTION).await.unwrap(), 7);
}

#[tokio::test]
async fn shrinking_reingest_removes_stale_chunks() {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    let pipeline = pipeline(embedder, store.clone());

    pipeline.ingest_document(COLLECTION, &manual()).await.unwrap();
    let shorter = Document::new("manual.pdf", vec![Page::new(1, "Only one short page now.")]);
    let stats = pipeline.ingest_document(COLLECTION, &shorter).await.unwrap();

    assert_eq!(stats.chunks, 1);
    assert_eq!(stats.removed, 6);
    assert_eq!(
        store.document_chunk_ids(COLLECTION, "manual.pdf").await.unwrap(),
        vec!["manual.pdf_0".to_string()]
    );
}

#[tokio::test]
async fn dimension_mismatch_leaves_existing_entries_intact() {
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    pipeline(Arc::new(HashEmbeddingProvider::new(64)), store.clone())
        .ingest_documents(COLLECTION, &[manual()])
        .await
        .unwrap();

    let narrow: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
    let report = pipeline(narrow.clone(), store.clone())
        .ingest_documents(COLLECTION, &[Document::from_text("extra.txt", "More billing notes.")])
        .await
        .unwrap();

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].1, RagError::DimensionMismatch { expected: 64, actual: 32 }));
    assert_eq!(store.count(COLLECTION).await.unwrap(), 7);

    let retriever = Retriever::new(RagConfig::default(), narrow, store);
    let err = retriever.retrieve(COLLECTION, "billing", 3, None).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn short_embedding_batches_fail_the_document() {
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    let report = pipeline(Arc::new(ShortBatchEmbedder(HashEmbeddingProvider::default())), store.clone())
        .ingest_documents(COLLECTION, &[manual()])
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(matches!(report.failures().next().map(|f| f.1), Some(RagError::EmbeddingError { .. })));
    assert_eq!(store.count(COLLECTION).await.unwrap(), 0);
}

#[tokio::test]
async fn flushed_ingestion_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
    {
        let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::open(dir.path()).await.unwrap());
        pipeline(embedder.clone(), store).ingest_documents(COLLECTION, &[manual()]).await.unwrap();
    }

    let reopened: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::open(dir.path()).await.unwrap());
    assert_eq!(reopened.count(COLLECTION).await.unwrap(), 7);
    let retriever = Retriever::new(RagConfig::default(), embedder, reopened);
    let results = retriever.retrieve(COLLECTION, "security", 1, None).await.unwrap();
    assert_eq!(results[0].chunk.page, Some(3));
}

#[tokio::test]
async fn unreadable_documents_do_not_abort_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "Alpha covers onboarding.").unwrap();
    std::fs::write(dir.path().join("b.md"), "Beta covers\x0crefunds.").unwrap();
    std::fs::write(dir.path().join("c.docx"), "binary").unwrap();

    let paths = vec![
        dir.path().join("a.txt"),
        dir.path().join("missing.txt"),
        dir.path().join("b.md"),
        dir.path().join("c.docx"),
    ];
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
    let report = pipeline(Arc::new(HashEmbeddingProvider::default()), store.clone())
        .ingest(COLLECTION, &paths)
        .await
        .unwrap();

    assert_eq!(report.documents.len(), 4);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.total_chunks(), 3);
    let failed: Vec<_> = report.failures().map(|(id, _)| id.to_string()).collect();
    assert_eq!(
        failed,
        vec![
            dir.path().join("missing.txt").display().to_string(),
            dir.path().join("c.docx").display().to_string(),
        ]
    );
    assert!(report
        .failures()
        .all(|(_, e)| matches!(e, RagError::DocumentLoadFailure { .. })));
    assert_eq!(store.count(COLLECTION).await.unwrap(), 3);
}

#[tokio::test]
async fn a_batch_is_flushed_once() {
    let store = Arc::new(FlakyStore::new(usize::MAX));
    let documents: Vec<Document> = ["billing", "security", "backups"]
        .iter()
        .map(|topic| Document::from_text(*topic, paragraph(topic)))
        .collect();

    let report = pipeline(Arc::new(HashEmbeddingProvider::default()), store.clone())
        .ingest_documents(COLLECTION, &documents)
        .await
        .unwrap();
    assert_eq!(report.succeeded(), 3);
    assert_eq!(store.flushes(), 1);

    pipeline(Arc::new(HashEmbeddingProvider::default()), store.clone())
        .ingest_document(COLLECTION, &documents[0])
        .await
        .unwrap();
    assert_eq!(store.flushes(), 2);
}

#[tokio::test]
async fn store_outage_stops_the_batch_after_flushing() {
    let store = Arc::new(FlakyStore::new(1));
    let documents: Vec<Document> = ["billing", "security", "backups"]
        .iter()
        .map(|topic| Document::from_text(*topic, paragraph(topic)))
        .collect();

    let outcome = pipeline(Arc::new(HashEmbeddingProvider::default()), store.clone())
        .ingest_documents(COLLECTION, &documents)
        .await;

    assert!(matches!(outcome, Err(RagError::StoreUnavailable { .. })));
    assert_eq!(store.writes.load(Ordering::SeqCst), 2, "third document never attempted");
    assert_eq!(store.flushes(), 1);
    assert_eq!(store.count(COLLECTION).await.unwrap(), 1);
}
