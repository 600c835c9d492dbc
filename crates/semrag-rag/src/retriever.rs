//! Content retrieval over the record index

use semrag_core::{Record, Result, RetrievalConfig, ScoredRecord};
use semrag_vector::{SearchParams, SimilarityStore};
use std::sync::Arc;

/// Nearest-neighbour lookup of ingested records
pub struct Retriever {
    store: Arc<dyn SimilarityStore>,
    params: SearchParams,
}

impl Retriever {
    pub fn new(store: Arc<dyn SimilarityStore>, params: SearchParams) -> Self {
        Self { store, params }
    }

    pub fn from_config(store: Arc<dyn SimilarityStore>, config: &RetrievalConfig) -> Self {
        Self::new(store, SearchParams::new(config.top_k, config.min_score))
    }

    /// Records closest to `vector`, best first
    pub async fn retrieve(&self, vector: &[f32]) -> Result<Vec<ScoredRecord>> {
        let hits = self.store.search(vector, self.params).await?;
        tracing::debug!(
            "Retrieved {} records from '{}' (k={}, min_score={})",
            hits.len(),
            self.store.name(),
            self.params.top_k,
            self.params.min_score
        );

        hits.into_iter()
            .map(|hit| {
                Ok(ScoredRecord {
                    record: Record::from_payload(hit.id, hit.payload)?,
                    score: hit.score,
                })
            })
            .collect()
    }
}
