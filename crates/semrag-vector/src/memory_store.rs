//! In-process similarity store
//!
//! Flat scan over every point; used for tests and offline runs where no
//! managed vector database is available.

use crate::{enforce_search_params, IndexSpec, IndexedPoint, ScoredPoint, SearchParams};
use async_trait::async_trait;
use semrag_core::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory store bound to one index spec
pub struct MemoryStore {
    spec: IndexSpec,
    points: RwLock<HashMap<Uuid, IndexedPoint>>,
}

impl MemoryStore {
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            points: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of a stored point
    pub async fn get(&self, id: Uuid) -> Option<IndexedPoint> {
        self.points.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl super::SimilarityStore for MemoryStore {
    fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    async fn ensure_index(&self) -> Result<()> {
        tracing::debug!(
            "Memory index '{}' ready ({:?}, {:?}, dimension {})",
            self.spec.name,
            self.spec.kind,
            self.spec.similarity,
            self.spec.dimension
        );
        Ok(())
    }

    async fn upsert(&self, point: IndexedPoint) -> Result<()> {
        self.spec.check_dimension(&point.vector)?;
        self.points.write().await.insert(point.id, point);
        Ok(())
    }

    async fn search(&self, vector: &[f32], params: SearchParams) -> Result<Vec<ScoredPoint>> {
        self.spec.check_dimension(vector)?;

        let points = self.points.read().await;
        let mut hits: Vec<ScoredPoint> = points
            .values()
            .map(|point| ScoredPoint {
                id: point.id,
                score: self.spec.similarity.score(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();

        // Best first; ties broken by id so results are stable
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        Ok(enforce_search_params(hits, params))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.points.read().await.len() as u64)
    }
}
