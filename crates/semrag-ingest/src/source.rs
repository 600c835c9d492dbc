//! Record sources
//!
//! A source is either an `http(s)://` URL, downloaded as a byte stream, or a
//! local file path. Both are decoded element by element.

use crate::decoder::JsonArrayDecoder;
use futures::{Stream, StreamExt, TryStreamExt};
use semrag_core::{Result, SemragError};
use semrag_vector::http::{check_response, transport_error};
use std::pin::Pin;
use std::time::Duration;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

/// Lazily decoded source elements
pub type ElementStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value>> + Send>>;

/// True when `source` should be downloaded rather than read from disk
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Open `source` as a stream of array elements
pub async fn open_source(source: &str, connect_timeout_secs: u64) -> Result<ElementStream> {
    if is_remote(source) {
        open_url(source, connect_timeout_secs).await
    } else {
        open_file(source).await
    }
}

/// Stream a remote JSON array
pub async fn open_url(url: &str, connect_timeout_secs: u64) -> Result<ElementStream> {
    // no overall timeout: the body may take long to stream
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .build()
        .map_err(|e| SemragError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error("Source download", e, SemragError::IngestError))?;
    let response = check_response("Source download", response, SemragError::IngestError).await?;
    tracing::info!("Streaming records from {}", url);

    let bytes = response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let reader = StreamReader::new(bytes);

    let elements = FramedRead::new(reader, JsonArrayDecoder::new())
        .map(|item| item.map_err(SemragError::from));
    Ok(Box::pin(elements))
}

/// Stream a JSON array from a local file
pub async fn open_file(path: &str) -> Result<ElementStream> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SemragError::IngestError(format!("Failed to open {path}: {e}")))?;
    tracing::info!("Reading records from {}", path);

    let elements = FramedRead::new(file, JsonArrayDecoder::new())
        .map(|item| item.map_err(SemragError::from));
    Ok(Box::pin(elements))
}
