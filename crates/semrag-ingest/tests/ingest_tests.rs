//! Ingestion from downloaded and local sources into an in-memory index

use async_trait::async_trait;
use semrag_core::{IngestConfig, Result, RetryPolicy, SemragError, VectorConfig};
use semrag_ingest::Ingestor;
use semrag_vector::{
    EmbeddingClient, HashingEmbedding, IndexSpec, MemoryStore, RetryingEmbedding, SearchParams,
    SimilarityStore,
};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIMENSION: usize = 1536;

fn setup() -> (Ingestor, Arc<MemoryStore>, HashingEmbedding) {
    let config = VectorConfig {
        dimension: DIMENSION,
        ..Default::default()
    };
    let store = Arc::new(MemoryStore::new(IndexSpec::from_config("movies", &config)));
    let ingestor = Ingestor::new(
        Arc::new(HashingEmbedding::new(DIMENSION)),
        store.clone(),
        IngestConfig {
            pause_every: 0,
            ..Default::default()
        },
    );
    (ingestor, store, HashingEmbedding::new(DIMENSION))
}

/// Serves the first `healthy` calls, then reports the service as down
struct FailingAfter {
    healthy: u32,
    calls: AtomicU32,
    inner: HashingEmbedding,
}

#[async_trait]
impl EmbeddingClient for FailingAfter {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy {
            return Err(SemragError::Unavailable("503 Service Unavailable".to_string()));
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        "failing-after"
    }
}

fn movies() -> serde_json::Value {
    json!([
        {"id": 862, "title": "Toy Story", "overview": "A toy spaceship crashes on a desert planet"},
        {"id": 949, "title": "Heat", "overview": "Professional bank robbers plan one last heist"},
        {"id": 5, "title": "Four Rooms", "overview": "Hotel bellhop works his first night shift"}
    ])
}

#[tokio::test]
async fn test_ingest_from_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movies.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(movies()))
        .expect(1)
        .mount(&server)
        .await;

    let (ingestor, store, embedder) = setup();
    let report = ingestor
        .ingest_source(&format!("{}/movies.json", server.uri()))
        .await
        .unwrap();

    assert_eq!(report.ingested, 3);
    assert_eq!(store.count().await.unwrap(), 3);

    let hits = store
        .search(
            &embedder.embed_sync("Whose spaceship crashed on a desert planet"),
            SearchParams::new(5, 0.2),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload["title"], "Toy Story");

    let point = store.get(hits[0].id).await.unwrap();
    assert_eq!(point.vector.len(), DIMENSION);
}

#[tokio::test]
async fn test_ingest_from_file_with_limit() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", movies()).unwrap();

    let (ingestor, store, _) = setup();
    let report = ingestor
        .with_limit(Some(2))
        .ingest_source(file.path().to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(report.ingested, 2);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_download_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such file"))
        .mount(&server)
        .await;

    let (ingestor, store, _) = setup();
    let err = ingestor
        .ingest_source(&format!("{}/missing.json", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, SemragError::IngestError(ref m) if m.contains("404")));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_truncated_download_fails_after_complete_elements() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"[{"overview": "one"}, {"overview": "tw"#),
        )
        .mount(&server)
        .await;

    let (ingestor, store, _) = setup();
    let err = ingestor.ingest_source(&server.uri()).await.unwrap_err();

    assert!(matches!(err, SemragError::IngestError(_)));
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_embedding_retry_exhaustion_stops_ingestion() {
    let (_, store, _) = setup();
    let embedder = RetryingEmbedding::new(
        Box::new(FailingAfter {
            healthy: 1,
            calls: AtomicU32::new(0),
            inner: HashingEmbedding::new(DIMENSION),
        }),
        RetryPolicy::immediate(3),
    );
    let ingestor = Ingestor::new(
        Arc::new(embedder),
        store.clone(),
        IngestConfig {
            pause_every: 0,
            ..Default::default()
        },
    );

    let elements = futures::stream::iter(
        movies()
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Ok),
    );
    let err = ingestor.ingest(elements).await.unwrap_err();

    match err {
        SemragError::RetriesExhausted {
            operation,
            attempts,
            source,
        } => {
            assert_eq!(operation, "embed");
            assert_eq!(attempts, 3);
            assert!(matches!(*source, SemragError::Unavailable(_)));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    // only the record embedded before the outage was written
    assert_eq!(store.count().await.unwrap(), 1);
    let hits = store
        .search(
            &HashingEmbedding::new(DIMENSION).embed_sync("Professional bank robbers"),
            SearchParams::new(5, 0.2),
        )
        .await
        .unwrap();
    assert!(hits.is_empty());
}
