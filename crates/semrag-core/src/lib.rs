//! Semrag Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout semrag:
//! - Content records, semantic cache entries and queries
//! - Chat messages and the LLM client trait
//! - Similarity metrics shared by every vector index
//! - Common error types
//! - Bounded retry policy for calls to external endpoints
//! - Configuration management

pub mod config;
pub mod retry;

pub use config::{
    AppConfig, CacheConfig, ConfigError, IndexConfig, IngestConfig, LlmConfig, LlmProvider,
    LoggingConfig, RetrievalConfig, VectorBackend, VectorConfig,
};
pub use retry::RetryPolicy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for semrag operations
#[derive(Error, Debug)]
pub enum SemragError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Search error: {0}")]
    SearchError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<SemragError>,
    },

    #[error("Ingestion error: {0}")]
    IngestError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SemragError {
    /// Whether a retry may succeed (rate limits, 5xx, timeouts, dropped connections)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Unavailable(_))
    }
}

impl From<ConfigError> for SemragError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SemragError>;

// ============================================================================
// Content Records
// ============================================================================

/// A document in the content index
///
/// `text` is the field that gets embedded; `payload` keeps the full source
/// object so answers can cite whatever the source carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier (stable across re-ingestion of the same source)
    pub id: Uuid,

    /// Optional display title
    pub title: Option<String>,

    /// Text used for embedding
    pub text: String,

    /// Full source object
    pub payload: serde_json::Value,
}

impl Record {
    /// Create a record with a random id
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: None,
            text: text.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Set the id
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Attach the source payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Short label used in prompts and CLI output
    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => self.id.to_string(),
        }
    }

    /// Payload stored next to the record's vector
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "text": self.text,
            "title": self.title,
            "source": self.payload,
        })
    }

    /// Rebuild a record from a stored point
    pub fn from_payload(id: Uuid, payload: serde_json::Value) -> Result<Self> {
        let stored: StoredRecord = serde_json::from_value(payload)
            .map_err(|e| SemragError::SearchError(format!("Malformed record {id}: {e}")))?;
        Ok(Self {
            id,
            title: stored.title,
            text: stored.text,
            payload: stored.source,
        })
    }
}

#[derive(Deserialize)]
struct StoredRecord {
    text: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    source: serde_json::Value,
}

/// A record returned by similarity search, with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f32,
}

// ============================================================================
// Semantic Cache Entries
// ============================================================================

/// A previously answered question held in the semantic cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: Uuid,

    /// Question text as asked
    pub question: String,

    /// Embedding of `question`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,

    /// Answer returned for `question`
    pub answer: String,

    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(question: impl Into<String>, vector: Vec<f32>, answer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            vector,
            answer: answer.into(),
            created_at: Utc::now(),
        }
    }

    /// Payload stored next to the question vector
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "question": self.question,
            "answer": self.answer,
            "created_at": self.created_at,
        })
    }

    /// Rebuild an entry from a stored point; the vector is not carried back
    pub fn from_payload(id: Uuid, payload: serde_json::Value) -> Result<Self> {
        let stored: StoredCacheEntry = serde_json::from_value(payload)
            .map_err(|e| SemragError::SearchError(format!("Malformed cache entry {id}: {e}")))?;
        Ok(Self {
            id,
            question: stored.question,
            vector: Vec::new(),
            answer: stored.answer,
            created_at: stored.created_at,
        })
    }
}

#[derive(Deserialize)]
struct StoredCacheEntry {
    question: String,
    answer: String,
    created_at: DateTime<Utc>,
}

// ============================================================================
// Chat and Query Types
// ============================================================================

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A user question plus the conversation so far
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    /// User's question
    pub question: String,

    /// Prior turns, oldest first
    pub history: Vec<ChatMessage>,
}

impl Query {
    /// Create a query without history
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
        }
    }

    /// Attach conversation history
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

/// How the semantic cache participated in an answer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CacheStatus {
    /// Served from the cache; generation was skipped
    Hit { similarity: f32 },
    /// Freshly generated and written to the cache
    Miss,
    /// Semantic cache turned off
    Disabled,
}

impl CacheStatus {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Answer produced by the RAG pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    /// Generated (or cached) answer
    pub answer: String,

    /// Records retrieved as context, best first
    pub sources: Vec<ScoredRecord>,

    /// Cache participation
    pub cache: CacheStatus,

    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

// ============================================================================
// Similarity
// ============================================================================

/// Similarity metric of a vector index. Higher scores are always more similar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    DotProduct,
}

impl SimilarityMetric {
    /// Score two equal-length vectors
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::DotProduct => dot(a, b),
        }
    }
}

impl std::str::FromStr for SimilarityMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" | "cos" => Ok(Self::Cosine),
            "dot" | "dot_product" | "ip" => Ok(Self::DotProduct),
            _ => Err(ConfigError::InvalidValue {
                key: "similarity".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity; 0.0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for chat-completion clients
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a conversation, returning the assistant reply
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Single-prompt convenience wrapper around [`LlmClient::chat`]
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.chat(&[ChatMessage::user(prompt)]).await
    }

    /// Backend name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================
