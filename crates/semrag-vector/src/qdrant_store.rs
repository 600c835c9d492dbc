//! Qdrant implementation for vector storage
//!
//! Provides connection management and vector operations for one collection.
//! The content index and the semantic cache are two instances of this store
//! bound to different collections.
//!
//! Author: hephaex@gmail.com

use crate::{enforce_search_params, IndexSpec, IndexedPoint, ScoredPoint, SearchParams};
use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, HnswConfigDiffBuilder, PointId,
    PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
    VectorParamsMap, VectorsConfig,
};
use qdrant_client::Qdrant;
use semrag_core::config::IndexKind;
use semrag_core::{Result, SemragError, SimilarityMetric, VectorConfig};
use std::collections::HashMap;
use uuid::Uuid;

/// Qdrant vector store implementation
pub struct QdrantStore {
    client: Qdrant,
    spec: IndexSpec,
}

impl QdrantStore {
    /// Create a new Qdrant connection bound to `spec`
    pub fn connect(config: &VectorConfig, spec: IndexSpec) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.qdrant_url);
        if let Some(key) = &config.qdrant_api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| SemragError::DatabaseError(format!("Qdrant connection failed: {e}")))?;

        Ok(Self { client, spec })
    }

    /// Index parameters expressed as a Qdrant collection definition
    fn collection_definition(&self) -> CreateCollectionBuilder {
        let distance = match self.spec.similarity {
            SimilarityMetric::Cosine => Distance::Cosine,
            SimilarityMetric::DotProduct => Distance::Dot,
        };
        let params = VectorParamsBuilder::new(self.spec.dimension as u64, distance).build();

        let vectors = VectorsConfig {
            config: Some(VectorsConfigKind::ParamsMap(VectorParamsMap {
                map: HashMap::from([(self.spec.vector_field.clone(), params)]),
            })),
        };

        // m = 0 turns off graph construction, leaving exact search
        let m = match self.spec.kind {
            IndexKind::Hnsw => self.spec.m,
            IndexKind::Flat => 0,
        };
        let hnsw = HnswConfigDiffBuilder::default()
            .m(m)
            .ef_construct(self.spec.ef_construction);

        CreateCollectionBuilder::new(&self.spec.name)
            .vectors_config(vectors)
            .hnsw_config(hnsw)
    }
}

/// Convert a JSON object into a Qdrant payload
fn to_payload(value: &serde_json::Value) -> Result<HashMap<String, Value>> {
    match value {
        serde_json::Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect()),
        serde_json::Value::Null => Ok(HashMap::new()),
        other => Err(SemragError::ValidationError(format!(
            "Point payload must be a JSON object, got {other}"
        ))),
    }
}

/// Convert a Qdrant payload value back into JSON
fn to_json(value: Value) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(to_json).collect())
        }
        Some(Kind::StructValue(st)) => serde_json::Value::Object(
            st.fields.into_iter().map(|(k, v)| (k, to_json(v))).collect(),
        ),
    }
}

fn parse_point_id(id: Option<PointId>) -> Option<Uuid> {
    match id?.point_id_options? {
        PointIdOptions::Uuid(s) => Uuid::parse_str(&s).ok(),
        PointIdOptions::Num(_) => None,
    }
}

#[async_trait]
impl super::SimilarityStore for QdrantStore {
    fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    async fn ensure_index(&self) -> Result<()> {
        // Check if collection exists
        let collections = self.client.list_collections().await.map_err(|e| {
            SemragError::DatabaseError(format!("Failed to list collections: {e}"))
        })?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.spec.name);

        if exists {
            tracing::debug!("Collection '{}' already exists", self.spec.name);
            return Ok(());
        }

        self.client
            .create_collection(self.collection_definition())
            .await
            .map_err(|e| SemragError::DatabaseError(format!("Failed to create collection: {e}")))?;

        tracing::info!(
            "Created collection '{}' ({:?}, m={}, ef_construction={}, {:?}, dimension {})",
            self.spec.name,
            self.spec.kind,
            self.spec.m,
            self.spec.ef_construction,
            self.spec.similarity,
            self.spec.dimension
        );
        Ok(())
    }

    async fn upsert(&self, point: IndexedPoint) -> Result<()> {
        self.spec.check_dimension(&point.vector)?;

        let payload = to_payload(&point.payload)?;
        let vectors = HashMap::from([(self.spec.vector_field.clone(), point.vector)]);
        let point = PointStruct::new(point.id.to_string(), vectors, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.spec.name, vec![point]).wait(true))
            .await
            .map_err(|e| SemragError::DatabaseError(format!("Failed to upsert vector: {e}")))?;

        Ok(())
    }

    async fn search(&self, vector: &[f32], params: SearchParams) -> Result<Vec<ScoredPoint>> {
        self.spec.check_dimension(vector)?;

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.spec.name, vector.to_vec(), params.top_k as u64)
                    .vector_name(&self.spec.vector_field)
                    .score_threshold(params.min_score)
                    .with_payload(true),
            )
            .await
            .map_err(|e| SemragError::SearchError(format!("Vector search failed: {e}")))?;

        let hits: Vec<ScoredPoint> = results
            .result
            .into_iter()
            .filter_map(|point| {
                let Some(id) = parse_point_id(point.id) else {
                    tracing::warn!("Skipping point without a UUID id in '{}'", self.spec.name);
                    return None;
                };
                let payload = serde_json::Value::Object(
                    point
                        .payload
                        .into_iter()
                        .map(|(k, v)| (k, to_json(v)))
                        .collect(),
                );
                Some(ScoredPoint {
                    id,
                    score: point.score,
                    payload,
                })
            })
            .collect();

        // Qdrant already applies both bounds; re-check so every backend agrees
        Ok(enforce_search_params(hits, params))
    }

    async fn count(&self) -> Result<u64> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.spec.name).exact(true))
            .await
            .map_err(|e| SemragError::DatabaseError(format!("Failed to count points: {e}")))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}
