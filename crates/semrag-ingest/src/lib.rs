//! SemRAG Ingest - Streaming ingestion into the content index
//!
//! Source records arrive as elements of one JSON array. Each element is
//! embedded on its configured text field and written to the content index,
//! one at a time, pausing every N records as a coarse rate limit.
//!
//! Author: hephaex@gmail.com

use futures::{Stream, StreamExt};
use semrag_core::{IngestConfig, Record, Result, SemragError};
use semrag_vector::{EmbeddingClient, IndexedPoint, SimilarityStore};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub mod decoder;
pub mod source;

pub use decoder::{DecodeError, JsonArrayDecoder};
pub use source::{open_source, ElementStream};

/// Outcome of one ingestion run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Records written to the content index
    pub ingested: usize,
    /// Pacing pauses taken
    pub pauses: usize,
    pub elapsed_ms: u64,
}

/// Embeds source elements and writes them to the content index
pub struct Ingestor {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn SimilarityStore>,
    config: IngestConfig,
    limit: Option<usize>,
    connect_timeout_secs: u64,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn SimilarityStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            limit: None,
            connect_timeout_secs: 30,
        }
    }

    /// Stop after `limit` records
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Build a record from the element at `ordinal`
    pub fn to_record(&self, ordinal: usize, element: serde_json::Value) -> Result<Record> {
        let text = element
            .get(&self.config.text_field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SemragError::IngestError(format!(
                    "Element {ordinal} has no string field '{}'",
                    self.config.text_field
                ))
            })?
            .to_string();

        let title = self
            .config
            .title_field
            .as_ref()
            .and_then(|field| element.get(field))
            .and_then(scalar_to_string);

        let id = self.record_id(ordinal, &element);

        let mut record = Record::new(text).with_id(id).with_payload(element);
        if let Some(title) = title {
            record = record.with_title(title);
        }
        Ok(record)
    }

    /// Stable id from the source id field, or the stream position without one
    ///
    /// The key carries the JSON type of the id, so `862` and `"862"` differ.
    fn record_id(&self, ordinal: usize, element: &serde_json::Value) -> Uuid {
        let key = self
            .config
            .id_field
            .as_ref()
            .and_then(|field| element.get(field))
            .and_then(|id| match id {
                serde_json::Value::Number(n) => Some(format!("n:{n}")),
                serde_json::Value::String(s) => Some(format!("s:{s}")),
                _ => None,
            })
            .map(|id| format!("{}/id/{}", self.store.name(), id))
            .unwrap_or_else(|| format!("{}/ordinal/{}", self.store.name(), ordinal));
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }

    /// Ingest every element of `elements`
    ///
    /// Two elements resolving to the same record id fail the run at the
    /// second one, so `ingested` always equals the points written.
    pub async fn ingest<S>(&self, elements: S) -> Result<IngestReport>
    where
        S: Stream<Item = Result<serde_json::Value>> + Unpin,
    {
        let start = Instant::now();
        let mut elements = elements;
        let mut ingested = 0;
        let mut pauses = 0;
        let mut seen = HashSet::new();

        while let Some(element) = elements.next().await {
            if self.limit.is_some_and(|limit| ingested >= limit) {
                break;
            }

            let record = self.to_record(ingested, element?)?;
            if !seen.insert(record.id) {
                return Err(SemragError::IngestError(format!(
                    "Element {} repeats the id of an earlier element ({})",
                    ingested,
                    record.label()
                )));
            }
            let vector = self.embedder.embed(&record.text).await?;
            self.store
                .upsert(IndexedPoint::new(record.id, vector, record.to_payload()))
                .await?;
            ingested += 1;
            tracing::debug!("Ingested record {} ({})", ingested, record.label());

            if self.config.pause_every > 0 && ingested % self.config.pause_every == 0 {
                tracing::info!(
                    "Ingested {} records, pausing {}ms",
                    ingested,
                    self.config.pause_ms
                );
                tokio::time::sleep(Duration::from_millis(self.config.pause_ms)).await;
                pauses += 1;
            }

            if self.limit.is_some_and(|limit| ingested >= limit) {
                break;
            }
        }

        let report = IngestReport {
            ingested,
            pauses,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "Ingestion into '{}' finished: {} records in {}ms",
            self.store.name(),
            report.ingested,
            report.elapsed_ms
        );
        Ok(report)
    }

    /// Ingest from a URL or file path
    pub async fn ingest_source(&self, source: &str) -> Result<IngestReport> {
        let elements = open_source(source, self.connect_timeout_secs).await?;
        self.ingest(elements).await
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
