//! End-to-end pipeline behaviour over in-memory stores and the hashing embedder

use async_trait::async_trait;
use semrag_core::{
    CacheStatus, ChatMessage, LlmClient, Query, Record, Result, RetrievalConfig, RetryPolicy,
    SemragError, VectorConfig,
};
use semrag_rag::{RagPipeline, RetryingLlm, SemanticCache};
use semrag_vector::{
    EmbeddingClient, HashingEmbedding, IndexSpec, IndexedPoint, MemoryStore, RetryingEmbedding,
    SimilarityStore,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const DIMENSION: usize = 1536;

/// Answers with the first context section it was given
#[derive(Default)]
struct ScriptedLlm {
    calls: AtomicU32,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = &messages[0].content;
        let first = system
            .lines()
            .find(|line| line.starts_with("[1] "))
            .map(|line| line.trim_start_matches("[1] ").to_string());
        Ok(match first {
            Some(title) => format!("It was in {title}."),
            None => "I don't know.".to_string(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Fails transiently a fixed number of times before delegating
struct FlakyLlm {
    failures: u32,
    calls: AtomicU32,
    inner: ScriptedLlm,
}

#[async_trait]
impl LlmClient for FlakyLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(SemragError::RateLimited("429 Too Many Requests".to_string()));
        }
        self.inner.chat(messages).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

struct FlakyEmbedding {
    failures: u32,
    calls: AtomicU32,
    inner: HashingEmbedding,
}

#[async_trait]
impl EmbeddingClient for FlakyEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(SemragError::Unavailable("503 Service Unavailable".to_string()));
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

struct Fixture {
    embedder: Arc<HashingEmbedding>,
    content: Arc<MemoryStore>,
    cache: Arc<MemoryStore>,
}

impl Fixture {
    fn new() -> Self {
        let config = VectorConfig {
            dimension: DIMENSION,
            ..Default::default()
        };
        Self {
            embedder: Arc::new(HashingEmbedding::new(DIMENSION)),
            content: Arc::new(MemoryStore::new(IndexSpec::from_config("movies", &config))),
            cache: Arc::new(MemoryStore::new(IndexSpec::from_config(
                "semantic_cache",
                &config,
            ))),
        }
    }

    async fn ingest(&self, title: &str, text: &str) -> Record {
        let record = Record::new(text).with_title(title);
        self.content
            .upsert(IndexedPoint::new(
                record.id,
                self.embedder.embed_sync(text),
                record.to_payload(),
            ))
            .await
            .unwrap();
        record
    }

    fn pipeline_with(
        &self,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
    ) -> RagPipeline {
        RagPipeline::new(embedder, self.content.clone(), llm, RetrievalConfig::default())
            .with_semantic_cache(SemanticCache::new(self.cache.clone(), 0.99))
    }

    fn pipeline(&self, llm: Arc<dyn LlmClient>) -> RagPipeline {
        self.pipeline_with(self.embedder.clone(), llm)
    }
}

#[tokio::test]
async fn test_end_to_end_spaceship() {
    let fixture = Fixture::new();
    let record = fixture
        .ingest("Toy Story", "A toy spaceship crashes on a desert planet")
        .await;
    fixture
        .ingest("Rush Hour 2", "Two cops chase smugglers through Hong Kong")
        .await;

    let llm = Arc::new(ScriptedLlm::default());
    let pipeline = fixture.pipeline(llm.clone());
    let query = Query::new("Whose spaceship crashed on a desert planet");

    let first = pipeline.ask(&query).await.unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(first.sources.len(), 1);
    assert_eq!(first.sources[0].record.id, record.id);
    assert!(first.sources[0].score >= 0.2);
    assert!(first.answer.contains("Toy Story"));

    let second = pipeline.ask(&query).await.unwrap();
    assert!(second.cache.is_hit());
    assert_eq!(second.answer, first.answer);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    let stats = pipeline.cache_stats().unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.writes, 1);
}

#[tokio::test]
async fn test_cache_hit_skips_generation() {
    let fixture = Fixture::new();
    let question = "Which movie has a toy spaceship?";
    let cache = SemanticCache::new(fixture.cache.clone(), 0.99);
    cache
        .store(question, fixture.embedder.embed_sync(question), "Toy Story")
        .await
        .unwrap();

    let llm = Arc::new(ScriptedLlm::default());
    let pipeline = fixture.pipeline(llm.clone());

    // Same words modulo case and punctuation embed identically
    let answer = pipeline
        .ask(&Query::new("which movie has a TOY spaceship"))
        .await
        .unwrap();

    assert_eq!(answer.answer, "Toy Story");
    match answer.cache {
        CacheStatus::Hit { similarity } => assert!(similarity >= 0.99),
        other => panic!("expected a cache hit, got {other:?}"),
    }
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_miss_generates_once_and_caches_question() {
    let fixture = Fixture::new();
    fixture
        .ingest("Toy Story", "A toy spaceship crashes on a desert planet")
        .await;

    let llm = Arc::new(ScriptedLlm::default());
    let pipeline = fixture.pipeline(llm.clone());
    let question = "Whose spaceship crashed on a desert planet";

    pipeline.ask(&Query::new(question)).await.unwrap();

    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.cache.count().await.unwrap(), 1);

    let probe = SemanticCache::new(fixture.cache.clone(), 0.99);
    let hit = probe
        .lookup(&fixture.embedder.embed_sync(question))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.entry.question, question);
    assert!((hit.similarity - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_unrelated_question_retrieves_nothing() {
    let fixture = Fixture::new();
    fixture
        .ingest("Toy Story", "A toy spaceship crashes on a desert planet")
        .await;

    let pipeline = fixture.pipeline(Arc::new(ScriptedLlm::default()));
    let answer = pipeline
        .ask(&Query::new("Two cops chase smugglers through Hong Kong"))
        .await
        .unwrap();

    assert!(answer.sources.is_empty());
    assert_eq!(answer.answer, "I don't know.");
}

#[tokio::test]
async fn test_retrieval_respects_top_k_and_threshold() {
    let fixture = Fixture::new();
    for i in 0..8 {
        fixture
            .ingest(
                &format!("Planet {i}"),
                &format!("A spaceship lands on desert planet number {i}"),
            )
            .await;
    }
    fixture
        .ingest("Rush Hour 2", "Two cops chase smugglers through Hong Kong")
        .await;
    assert_eq!(fixture.content.count().await.unwrap(), 9);

    let pipeline = fixture.pipeline(Arc::new(ScriptedLlm::default()));
    let answer = pipeline
        .ask(&Query::new("spaceship on a desert planet"))
        .await
        .unwrap();

    assert_eq!(answer.sources.len(), 5);
    for source in &answer.sources {
        assert!(source.score >= 0.2);
        assert!(source.record.label().starts_with("Planet"));
    }
    for pair in answer.sources.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn test_failed_generation_does_not_write_cache() {
    let fixture = Fixture::new();
    let llm = Arc::new(RetryingLlm::new(
        Box::new(FlakyLlm {
            failures: 3,
            calls: AtomicU32::new(0),
            inner: ScriptedLlm::default(),
        }),
        RetryPolicy::immediate(3),
    ));
    let pipeline = fixture.pipeline(llm);

    let err = pipeline
        .ask(&Query::new("Whose spaceship crashed?"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SemragError::RetriesExhausted { attempts: 3, .. }
    ));
    assert_eq!(fixture.cache.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_transient_generation_failures_recover() {
    let fixture = Fixture::new();
    let flaky = FlakyLlm {
        failures: 2,
        calls: AtomicU32::new(0),
        inner: ScriptedLlm::default(),
    };
    let llm = Arc::new(RetryingLlm::new(Box::new(flaky), RetryPolicy::immediate(3)));
    let pipeline = fixture.pipeline(llm);

    let answer = pipeline
        .ask(&Query::new("Whose spaceship crashed?"))
        .await
        .unwrap();

    assert_eq!(answer.cache, CacheStatus::Miss);
    assert_eq!(fixture.cache.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_embedding_retry_exhaustion_leaves_stores_unmodified() {
    let fixture = Fixture::new();
    fixture
        .ingest("Toy Story", "A toy spaceship crashes on a desert planet")
        .await;

    let embedder = RetryingEmbedding::new(
        Box::new(FlakyEmbedding {
            failures: 5,
            calls: AtomicU32::new(0),
            inner: HashingEmbedding::new(DIMENSION),
        }),
        RetryPolicy::immediate(3),
    );
    let llm = Arc::new(ScriptedLlm::default());
    let pipeline = fixture.pipeline_with(Arc::new(embedder), llm.clone());

    let err = pipeline
        .ask(&Query::new("Whose spaceship crashed?"))
        .await
        .unwrap_err();

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
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.content.count().await.unwrap(), 1);
    assert_eq!(fixture.cache.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_history_reaches_the_model() {
    struct HistoryProbe;

    #[async_trait]
    impl LlmClient for HistoryProbe {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            Ok(messages
                .iter()
                .skip(1)
                .map(|m| format!("{}:{}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("|"))
        }

        fn name(&self) -> &str {
            "probe"
        }
    }

    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Arc::new(HistoryProbe));
    let query = Query::new("And the sequel?").with_history(vec![
        ChatMessage::user("Who made Toy Story?"),
        ChatMessage::assistant("Pixar."),
    ]);

    let answer = pipeline.ask(&query).await.unwrap();
    assert_eq!(
        answer.answer,
        "user:Who made Toy Story?|assistant:Pixar.|user:And the sequel?"
    );
}
