//! In-process caching for the RAG pipeline
//!
//! Provides:
//! - An embedding memo, so a question text is embedded at most once per TTL
//! - Hit/miss/write counters shared with the semantic cache
//!
//! Uses the moka crate for thread-safe, async-compatible caching with TTL
//! support.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use moka::future::Cache;
use semrag_core::{CacheConfig, Result};
use semrag_vector::EmbeddingClient;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Embedding Cache
// ============================================================================

/// Memo of text embeddings
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<u64, Vec<f32>>,
    stats: Arc<CacheStats>,
}

impl EmbeddingCache {
    /// Create a memo holding up to `capacity` vectors for `ttl`
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::new("embedding")),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.embedding_memo_capacity,
            Duration::from_secs(config.embedding_memo_ttl_secs),
        )
    }

    /// Get a memoized embedding
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let result = self.cache.get(&hash_text(text)).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store an embedding
    pub async fn put(&self, text: &str, embedding: Vec<f32>) {
        self.cache.insert(hash_text(text), embedding).await;
        self.stats.record_write();
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

// ============================================================================
// Memoizing embedding client
// ============================================================================

/// Embedding client that consults an [`EmbeddingCache`] before the wrapped client
pub struct MemoizedEmbedding {
    inner: Arc<dyn EmbeddingClient>,
    memo: EmbeddingCache,
}

impl MemoizedEmbedding {
    pub fn new(inner: Arc<dyn EmbeddingClient>, memo: EmbeddingCache) -> Self {
        Self { inner, memo }
    }

    pub fn memo(&self) -> &EmbeddingCache {
        &self.memo
    }
}

#[async_trait]
impl EmbeddingClient for MemoizedEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.memo.get(text).await {
            tracing::debug!("Embedding memo hit");
            return Ok(vector);
        }

        let vector = self.inner.embed(text).await?;
        self.memo.put(text, vector.clone()).await;
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Counters for cache performance monitoring
#[derive(Debug)]
pub struct CacheStats {
    name: String,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl CacheStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Get a summary report
    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            total_requests: self.total_requests(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub total_requests: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

/// Hash text to a 64-bit cache key
fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use semrag_core::SemragError;
    use std::sync::atomic::AtomicUsize;

    struct CountingEmbedding {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for CountingEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.is_empty() {
                return Err(SemragError::EmbeddingError("empty".to_string()));
            }
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_embedding_cache_basic() {
        let cache = EmbeddingCache::default();
        let embedding = vec![0.1, 0.2, 0.3, 0.4];

        assert!(cache.get("Hello, world!").await.is_none());
        assert_eq!(cache.stats().misses(), 1);

        cache.put("Hello, world!", embedding.clone()).await;
        assert_eq!(cache.get("Hello, world!").await, Some(embedding));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().writes(), 1);
    }

    #[tokio::test]
    async fn test_memoized_embedding_calls_inner_once() {
        let inner = Arc::new(CountingEmbedding {
            calls: AtomicUsize::new(0),
        });
        let client = MemoizedEmbedding::new(inner.clone(), EmbeddingCache::default());

        let first = client.embed("toy spaceship").await.unwrap();
        let second = client.embed("toy spaceship").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.memo().stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_memoized_embedding_does_not_store_failures() {
        let inner = Arc::new(CountingEmbedding {
            calls: AtomicUsize::new(0),
        });
        let client = MemoizedEmbedding::new(inner.clone(), EmbeddingCache::default());

        assert!(client.embed("").await.is_err());
        assert!(client.embed("").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.memo().stats().writes(), 0);
    }

    #[test]
    fn test_stats_report() {
        let stats = CacheStats::new("semantic");
        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_miss();
        stats.record_write();
        stats.record_hit();
        stats.record_miss();

        let report = stats.report();
        assert_eq!(report.name, "semantic");
        assert_eq!(report.hits, 1);
        assert_eq!(report.misses, 2);
        assert_eq!(report.writes, 1);
        assert_eq!(report.total_requests, 3);
        assert!((report.hit_rate - 1.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn test_hash_text_consistency() {
        assert_eq!(hash_text("consistent"), hash_text("consistent"));
        assert_ne!(hash_text("a"), hash_text("b"));
    }
}
