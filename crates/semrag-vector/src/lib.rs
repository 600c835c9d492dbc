//! Semrag Vector - Similarity-indexed store abstraction
//!
//! Provides one abstraction over vector databases (Qdrant, in-memory) used
//! for both the content index and the semantic cache, plus the embedding
//! clients that produce the vectors stored in them.

use async_trait::async_trait;
use semrag_core::config::IndexKind;
use semrag_core::{Result, SemragError, SimilarityMetric, VectorBackend, VectorConfig};
use std::sync::Arc;
use uuid::Uuid;

pub mod embedding;
pub mod http;
pub mod memory_store;
pub mod qdrant_store;

pub use embedding::{
    create_embedding_client, EmbeddingClient, HashingEmbedding, OllamaEmbedding,
    OpenAiEmbedding, RetryingEmbedding,
};
pub use memory_store::MemoryStore;
pub use qdrant_store::QdrantStore;

/// Declaration of a vector index, passed through to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Collection / index name
    pub name: String,

    /// Vector field inside each point
    pub vector_field: String,

    pub kind: IndexKind,

    /// HNSW max connections per layer
    pub m: u64,

    /// HNSW build-time candidate list size
    pub ef_construction: u64,

    pub similarity: SimilarityMetric,

    /// Fixed vector length for every point in the index
    pub dimension: usize,
}

impl IndexSpec {
    /// Build the spec for `name` from the shared vector configuration
    pub fn from_config(name: impl Into<String>, config: &VectorConfig) -> Self {
        Self {
            name: name.into(),
            vector_field: config.index.vector_field.clone(),
            kind: config.index.kind,
            m: config.index.m,
            ef_construction: config.index.ef_construction,
            similarity: config.index.similarity,
            dimension: config.dimension,
        }
    }

    /// Reject vectors whose length differs from the index dimension
    pub fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(SemragError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// A vector with its JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

impl IndexedPoint {
    pub fn new(id: Uuid, vector: Vec<f32>, payload: serde_json::Value) -> Self {
        Self {
            id,
            vector,
            payload,
        }
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: Uuid,
    /// Similarity, higher is closer
    pub score: f32,
    pub payload: serde_json::Value,
}

/// k-NN search parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Maximum number of hits
    pub top_k: usize,

    /// Minimum similarity, inclusive
    pub min_score: f32,
}

impl SearchParams {
    pub fn new(top_k: usize, min_score: f32) -> Self {
        Self { top_k, min_score }
    }
}

/// Trait for similarity-indexed stores
///
/// Each instance is bound to one index. Implementations must enforce the
/// index dimension on both writes and searches, and return at most `top_k`
/// hits with `score >= min_score`, best first.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    /// Index declaration this store is bound to
    fn spec(&self) -> &IndexSpec;

    /// Index name for logging
    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Create the index if it does not exist yet
    async fn ensure_index(&self) -> Result<()>;

    /// Insert or replace a point
    async fn upsert(&self, point: IndexedPoint) -> Result<()>;

    /// k-nearest neighbours at or above the threshold
    async fn search(&self, vector: &[f32], params: SearchParams) -> Result<Vec<ScoredPoint>>;

    /// Number of stored points
    async fn count(&self) -> Result<u64>;
}

/// Apply the threshold and `top_k` cap to hits already sorted best first
pub fn enforce_search_params(hits: Vec<ScoredPoint>, params: SearchParams) -> Vec<ScoredPoint> {
    hits.into_iter()
        .filter(|hit| hit.score >= params.min_score)
        .take(params.top_k)
        .collect()
}

/// Open the store for `collection` using the configured backend
pub async fn create_store(
    config: &VectorConfig,
    collection: &str,
) -> Result<Arc<dyn SimilarityStore>> {
    let spec = IndexSpec::from_config(collection, config);
    match config.backend {
        VectorBackend::Qdrant => Ok(Arc::new(QdrantStore::connect(config, spec)?)),
        VectorBackend::Memory => Ok(Arc::new(MemoryStore::new(spec))),
    }
}
