//! SemRAG - Semantic-cache-augmented Retrieval-Augmented Generation
//!
//! Every question is embedded once, used to retrieve context records from
//! the content index, and then used to probe the semantic cache. A cache hit
//! returns the stored answer; a miss calls the chat model and records the new
//! question/answer pair after the answer is generated.
//!
//! Author: hephaex@gmail.com

use semrag_core::{
    AppConfig, CacheStatus, ChatMessage, LlmClient, Query, RagAnswer, Result, RetrievalConfig,
    SemragError,
};
use semrag_vector::{create_embedding_client, create_store, EmbeddingClient, SimilarityStore};
use std::sync::Arc;
use std::time::Instant;

pub mod cache;
pub mod llm;
pub mod prompt;
pub mod retriever;
pub mod semantic_cache;

pub use cache::{CacheStats, CacheStatsReport, EmbeddingCache, MemoizedEmbedding};
pub use llm::{create_llm_client, OllamaClient, OpenAiClient, RetryingLlm};
pub use prompt::{PromptBuilder, DEFAULT_SYSTEM_INSTRUCTION};
pub use retriever::Retriever;
pub use semantic_cache::{CacheHit, SemanticCache};

// ============================================================================
// Components
// ============================================================================

/// Shared clients and stores built from one [`AppConfig`]
///
/// Ingestion and querying must use the same store instances when the
/// in-memory backend is selected, so both are built from this struct.
#[derive(Clone)]
pub struct RagComponents {
    pub embedder: Arc<dyn EmbeddingClient>,
    pub content_store: Arc<dyn SimilarityStore>,
    pub cache_store: Arc<dyn SimilarityStore>,
    pub llm: Arc<dyn LlmClient>,
}

impl RagComponents {
    /// Build every client and store named by `config`
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingClient> = Arc::from(create_embedding_client(
            &config.llm,
            config.vector.dimension,
            &config.retry,
        )?);
        let embedder: Arc<dyn EmbeddingClient> = if config.cache.embedding_memo_capacity > 0 {
            Arc::new(MemoizedEmbedding::new(
                embedder,
                EmbeddingCache::from_config(&config.cache),
            ))
        } else {
            embedder
        };

        let content_store = create_store(&config.vector, &config.vector.content_collection).await?;
        let cache_store = create_store(&config.vector, &config.vector.cache_collection).await?;
        let llm: Arc<dyn LlmClient> = Arc::from(create_llm_client(&config.llm, &config.retry)?);

        tracing::info!(
            "Components ready: embedder={}, llm={}, content='{}', cache='{}'",
            embedder.name(),
            llm.name(),
            content_store.name(),
            cache_store.name()
        );

        Ok(Self {
            embedder,
            content_store,
            cache_store,
            llm,
        })
    }

    /// Create both indexes if missing
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.content_store.ensure_index().await?;
        self.cache_store.ensure_index().await?;
        Ok(())
    }
}

// ============================================================================
// RAG Pipeline
// ============================================================================

/// Retrieval plus cached generation
pub struct RagPipeline {
    embedder: Arc<dyn EmbeddingClient>,
    retriever: Retriever,
    semantic_cache: Option<SemanticCache>,
    llm: Arc<dyn LlmClient>,
    config: RetrievalConfig,
}

impl RagPipeline {
    /// Create a pipeline without a semantic cache
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        content_store: Arc<dyn SimilarityStore>,
        llm: Arc<dyn LlmClient>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            retriever: Retriever::from_config(content_store, &config),
            semantic_cache: None,
            llm,
            config,
        }
    }

    /// Enable the semantic cache
    pub fn with_semantic_cache(mut self, cache: SemanticCache) -> Self {
        self.semantic_cache = Some(cache);
        self
    }

    /// Assemble a pipeline from shared components
    pub fn from_components(components: &RagComponents, config: &AppConfig) -> Self {
        let pipeline = Self::new(
            Arc::clone(&components.embedder),
            Arc::clone(&components.content_store),
            Arc::clone(&components.llm),
            config.retrieval.clone(),
        );

        if config.cache.enabled {
            pipeline.with_semantic_cache(SemanticCache::from_config(
                Arc::clone(&components.cache_store),
                &config.cache,
            ))
        } else {
            pipeline
        }
    }

    /// Answer a question
    pub async fn ask(&self, query: &Query) -> Result<RagAnswer> {
        let start_time = Instant::now();

        let question = query.question.trim();
        if question.is_empty() {
            return Err(SemragError::ValidationError(
                "Question must not be empty".to_string(),
            ));
        }

        tracing::info!("RAG query started");

        // 1. Embed once; the vector serves both indexes
        let vector = self.embedder.embed(question).await?;

        // 2. Retrieve context
        let sources = self.retriever.retrieve(&vector).await?;
        tracing::debug!("Retrieved {} context records", sources.len());

        // 3. Probe the semantic cache
        if let Some(cache) = &self.semantic_cache {
            if let Some(hit) = cache.lookup(&vector).await? {
                tracing::info!("Answer served from semantic cache ({:.4})", hit.similarity);
                return Ok(RagAnswer {
                    answer: hit.entry.answer,
                    sources,
                    cache: CacheStatus::Hit {
                        similarity: hit.similarity,
                    },
                    processing_time_ms: start_time.elapsed().as_millis() as u64,
                });
            }
        }

        // 4. Generate
        let messages = PromptBuilder::new()
            .max_context_length(self.config.max_context_length)
            .max_history_messages(self.config.max_history_messages)
            .add_records(&sources)
            .history(&query.history)
            .question(question)
            .build();
        tracing::info!(
            "Calling LLM '{}' with {} messages",
            self.llm.name(),
            messages.len()
        );
        let answer = self.llm.chat(&messages).await?;
        tracing::info!("LLM response received: {} chars", answer.len());

        // 5. Remember the answer only once it exists
        let cache = match &self.semantic_cache {
            Some(cache) => {
                cache.store(question, vector, &answer).await?;
                CacheStatus::Miss
            }
            None => CacheStatus::Disabled,
        };

        Ok(RagAnswer {
            answer,
            sources,
            cache,
            processing_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    /// Semantic cache counters, if the cache is enabled
    pub fn cache_stats(&self) -> Option<CacheStatsReport> {
        self.semantic_cache
            .as_ref()
            .map(|cache| cache.stats().report())
    }

    pub fn max_history_messages(&self) -> usize {
        self.config.max_history_messages
    }
}

// ============================================================================
// Chat Session
// ============================================================================

/// A conversation that feeds its own turns back into the pipeline
pub struct ChatSession {
    pipeline: Arc<RagPipeline>,
    history: Vec<ChatMessage>,
    max_history: usize,
}

impl ChatSession {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        let max_history = pipeline.max_history_messages();
        Self {
            pipeline,
            history: Vec::new(),
            max_history,
        }
    }

    /// Ask within the conversation; the turn is recorded only on success
    pub async fn ask(&mut self, question: &str) -> Result<RagAnswer> {
        let query = Query::new(question).with_history(self.history.clone());
        let answer = self.pipeline.ask(&query).await?;

        self.history.push(ChatMessage::user(question.trim()));
        self.history.push(ChatMessage::assistant(answer.answer.as_str()));
        // drop whole turns so the history always opens with a user message
        let keep = self.max_history - self.max_history % 2;
        let excess = self.history.len().saturating_sub(keep);
        self.history.drain(..excess);

        Ok(answer)
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
