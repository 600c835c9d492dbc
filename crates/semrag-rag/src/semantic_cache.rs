//! Semantic answer cache
//!
//! Previously answered questions are stored by question embedding in their
//! own similarity index. A new question whose nearest stored question scores
//! at or above the threshold reuses the stored answer.

use crate::cache::CacheStats;
use semrag_core::{CacheConfig, CacheEntry, Result};
use semrag_vector::{IndexedPoint, SearchParams, SimilarityStore};
use std::sync::Arc;

/// A cache match
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub entry: CacheEntry,
    pub similarity: f32,
}

/// Question/answer cache over a [`SimilarityStore`]
pub struct SemanticCache {
    store: Arc<dyn SimilarityStore>,
    threshold: f32,
    stats: Arc<CacheStats>,
}

impl SemanticCache {
    pub fn new(store: Arc<dyn SimilarityStore>, threshold: f32) -> Self {
        Self {
            store,
            threshold,
            stats: Arc::new(CacheStats::new("semantic")),
        }
    }

    pub fn from_config(store: Arc<dyn SimilarityStore>, config: &CacheConfig) -> Self {
        Self::new(store, config.similarity_threshold)
    }

    /// Nearest stored question at or above the threshold
    pub async fn lookup(&self, vector: &[f32]) -> Result<Option<CacheHit>> {
        let hits = self
            .store
            .search(vector, SearchParams::new(1, self.threshold))
            .await?;

        let Some(best) = hits.into_iter().next() else {
            self.stats.record_miss();
            tracing::debug!("Semantic cache miss in '{}'", self.store.name());
            return Ok(None);
        };

        let entry = CacheEntry::from_payload(best.id, best.payload)?;
        self.stats.record_hit();
        tracing::debug!(
            "Semantic cache hit ({:.4}) for stored question {:?}",
            best.score,
            entry.question
        );

        Ok(Some(CacheHit {
            entry,
            similarity: best.score,
        }))
    }

    /// Persist an answered question
    pub async fn store(
        &self,
        question: &str,
        vector: Vec<f32>,
        answer: &str,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry::new(question, vector, answer);
        self.store
            .upsert(IndexedPoint::new(
                entry.id,
                entry.vector.clone(),
                entry.to_payload(),
            ))
            .await?;
        self.stats.record_write();
        Ok(entry)
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semrag_core::VectorConfig;
    use semrag_vector::{IndexSpec, MemoryStore};

    fn cache(threshold: f32) -> SemanticCache {
        let config = VectorConfig {
            dimension: 2,
            ..Default::default()
        };
        let store = MemoryStore::new(IndexSpec::from_config("cache", &config));
        SemanticCache::new(Arc::new(store), threshold)
    }

    #[tokio::test]
    async fn test_lookup_on_empty_cache_misses() {
        let cache = cache(0.99);
        assert!(cache.lookup(&[1.0, 0.0]).await.unwrap().is_none());
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn test_store_then_lookup_hits() {
        let cache = cache(0.99);
        let entry = cache
            .store("Who crashed?", vec![1.0, 0.0], "Buzz")
            .await
            .unwrap();

        let hit = cache.lookup(&[1.0, 0.0]).await.unwrap().unwrap();
        assert_eq!(hit.entry.id, entry.id);
        assert_eq!(hit.entry.answer, "Buzz");
        assert_eq!(hit.entry.question, "Who crashed?");
        assert!((hit.similarity - 1.0).abs() < 1e-6);
        assert_eq!(cache.stats().writes(), 1);
        assert_eq!(cache.stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_below_threshold_misses() {
        let cache = cache(0.99);
        cache.store("q", vec![1.0, 0.0], "a").await.unwrap();

        // cos ~ 0.98
        assert!(cache.lookup(&[1.0, 0.2]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let cache = cache(1.0);
        cache.store("q", vec![0.0, 2.0], "a").await.unwrap();
        assert!(cache.lookup(&[0.0, 5.0]).await.unwrap().is_some());
    }
}
