//! Semrag Configuration Management
//!
//! Handles configuration from environment variables and TOML config files,
//! with sensible defaults for development. Every component receives the
//! section it needs by reference; nothing reads the environment on its own.

use crate::{RetryPolicy, SimilarityMetric};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Chat and embedding endpoints
    pub llm: LlmConfig,

    /// Vector store connections and index layout
    pub vector: VectorConfig,

    /// Content retrieval policy
    pub retrieval: RetrievalConfig,

    /// Semantic cache policy
    pub cache: CacheConfig,

    /// Ingestion source and pacing
    pub ingest: IngestConfig,

    /// Retry policy for every call to a hosted endpoint
    pub retry: RetryPolicy,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply every variable `lookup` knows about on top of the current values
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // First match wins, so plain OpenAI names shadow the Azure aliases
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k));

        // LLM
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.llm.embedding_provider = Some(provider.parse()?);
        }
        if let Some(key) = first(&["OPENAI_API_KEY", "AOAI_KEY"]) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = first(&["OPENAI_BASE_URL", "AOAI_ENDPOINT"]) {
            self.llm.base_url = Some(url);
        }
        if let Some(version) = lookup("AOAI_API_VERSION") {
            self.llm.api_version = version;
        }
        if let Some(model) = first(&["LLM_MODEL", "AOAI_COMPLETIONS_DEPLOYMENT"]) {
            self.llm.chat_model = model;
        }
        if let Some(model) = first(&["EMBEDDING_MODEL", "AOAI_EMBEDDINGS_DEPLOYMENT"]) {
            self.llm.embedding_model = model;
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.llm.ollama_url = url;
        }

        // Vector store
        if let Some(backend) = lookup("VECTOR_BACKEND") {
            self.vector.backend = backend.parse()?;
        }
        if let Some(url) = lookup("QDRANT_URL") {
            self.vector.qdrant_url = url;
        }
        if let Some(key) = lookup("QDRANT_API_KEY") {
            self.vector.qdrant_api_key = Some(key);
        }
        if let Some(name) = lookup("CONTENT_COLLECTION") {
            self.vector.content_collection = name;
        }
        if let Some(name) = lookup("CACHE_COLLECTION") {
            self.vector.cache_collection = name;
        }
        if let Some(dimension) = lookup("VECTOR_DIMENSION") {
            self.vector.dimension = dimension.parse().map_err(|_| ConfigError::InvalidValue {
                key: "VECTOR_DIMENSION".to_string(),
                value: dimension,
            })?;
        }

        // Ingestion
        if let Some(source) = lookup("SOURCE_DATA_URL") {
            self.ingest.source = Some(source);
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Presence checks for the values the selected providers need
    pub fn validate(&self) -> Result<(), ConfigError> {
        for provider in [self.llm.provider, self.llm.embedding_provider()] {
            match provider {
                LlmProvider::OpenAI | LlmProvider::Azure if self.llm.api_key.is_none() => {
                    return Err(ConfigError::MissingRequired(format!(
                        "API key for provider '{provider}' (OPENAI_API_KEY or AOAI_KEY)"
                    )));
                }
                LlmProvider::Azure if self.llm.base_url.is_none() => {
                    return Err(ConfigError::MissingRequired(
                        "Azure OpenAI endpoint (AOAI_ENDPOINT)".to_string(),
                    ));
                }
                _ => {}
            }
        }

        if self.llm.provider == LlmProvider::Hashing {
            return Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: "hashing is only available as an embedding provider".to_string(),
            });
        }

        if self.vector.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VECTOR_DIMENSION".to_string(),
                value: "0".to_string(),
            });
        }

        if self.vector.content_collection == self.vector.cache_collection {
            return Err(ConfigError::InvalidValue {
                key: "CACHE_COLLECTION".to_string(),
                value: format!(
                    "'{}' must differ from the content collection",
                    self.vector.cache_collection
                ),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat completion provider
    pub provider: LlmProvider,

    /// Embedding provider; falls back to `provider` when unset
    pub embedding_provider: Option<LlmProvider>,

    /// API key (OpenAI or Azure OpenAI)
    pub api_key: Option<String>,

    /// API base URL; for Azure this is the resource endpoint
    pub base_url: Option<String>,

    /// Azure OpenAI REST API version
    pub api_version: String,

    /// Ollama server URL
    pub ollama_url: String,

    /// Chat model name (Azure: deployment name)
    pub chat_model: String,

    /// Embedding model name (Azure: deployment name)
    pub embedding_model: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Provider used for embeddings
    pub fn embedding_provider(&self) -> LlmProvider {
        self.embedding_provider.unwrap_or(self.provider)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            embedding_provider: None,
            api_key: None,
            base_url: None,
            api_version: "2024-02-01".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            max_tokens: 1024,
            temperature: 0.1,
            timeout_secs: 60,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Azure,
    Ollama,
    /// Offline feature-hashing embedder, no network
    Hashing,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Azure => write!(f, "azure"),
            Self::Ollama => write!(f, "ollama"),
            Self::Hashing => write!(f, "hashing"),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "azure" | "azure_openai" => Ok(Self::Azure),
            "ollama" => Ok(Self::Ollama),
            "hashing" => Ok(Self::Hashing),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Vector store backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Qdrant,
    /// Process-local flat index; contents are lost on exit
    Memory,
}

impl std::str::FromStr for VectorBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: "VECTOR_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub backend: VectorBackend,

    /// Qdrant gRPC URL
    pub qdrant_url: String,

    /// Qdrant API key (managed clusters)
    pub qdrant_api_key: Option<String>,

    /// Collection holding ingested records
    pub content_collection: String,

    /// Collection holding cached question/answer pairs
    pub cache_collection: String,

    /// Vector dimension (must match embedding model)
    pub dimension: usize,

    /// Index construction parameters, shared by both collections
    pub index: IndexConfig,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Qdrant,
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_api_key: None,
            content_collection: "movies".to_string(),
            cache_collection: "semantic_cache".to_string(),
            dimension: 1536, // text-embedding-3-small / ada-002
            index: IndexConfig::default(),
        }
    }
}

/// Index algorithm kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Hnsw,
    Flat,
}

/// Vector index construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub kind: IndexKind,

    /// Name of the vector field inside each point
    pub vector_field: String,

    /// HNSW: max connections per layer
    pub m: u64,

    /// HNSW: candidate list size while building
    pub ef_construction: u64,

    pub similarity: SimilarityMetric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::Hnsw,
            vector_field: "contentVector".to_string(),
            m: 16,
            ef_construction: 64,
            similarity: SimilarityMetric::Cosine,
        }
    }
}

/// Content retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of records to retrieve
    pub top_k: usize,

    /// Minimum similarity (inclusive)
    pub min_score: f32,

    /// Maximum context length for the prompt (characters)
    pub max_context_length: usize,

    /// Number of most recent history messages kept in the prompt
    pub max_history_messages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.2,
            max_context_length: 8000,
            max_history_messages: 10,
        }
    }
}

/// Semantic cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Minimum question similarity for a hit (inclusive)
    pub similarity_threshold: f32,

    /// Capacity of the in-process embedding memo
    pub embedding_memo_capacity: u64,

    /// Time-to-live of embedding memo entries (seconds)
    pub embedding_memo_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.99,
            embedding_memo_capacity: 1_000,
            embedding_memo_ttl_secs: 3600,
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// URL or local path of a JSON array of source objects
    pub source: Option<String>,

    /// Field embedded for each object
    pub text_field: String,

    /// Field used as display title
    pub title_field: Option<String>,

    /// Field whose value seeds the record id; stream ordinal when absent
    pub id_field: Option<String>,

    /// Pause after this many records (0 disables pacing)
    pub pause_every: usize,

    /// Length of each pause in milliseconds
    pub pause_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: None,
            text_field: "overview".to_string(),
            title_field: Some("title".to_string()),
            id_field: Some("id".to_string()),
            pause_every: 100,
            pause_ms: 1000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
