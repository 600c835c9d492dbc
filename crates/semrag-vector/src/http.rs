//! Shared HTTP plumbing for hosted model endpoints
//!
//! Maps transport failures and non-success statuses onto [`SemragError`] so
//! the retry policy can tell transient failures from permanent ones.

use reqwest::{Client, Response, StatusCode};
use semrag_core::{Result, SemragError};
use std::time::Duration;

/// Build an HTTP client with the configured request timeout
pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SemragError::ConfigError(format!("Failed to build HTTP client: {e}")))
}

/// Classify a transport error; timeouts and connection failures are transient
pub fn transport_error(
    context: &str,
    err: reqwest::Error,
    permanent: fn(String) -> SemragError,
) -> SemragError {
    let message = format!("{context} failed: {err}");
    if err.is_timeout() || err.is_connect() {
        SemragError::Unavailable(message)
    } else {
        permanent(message)
    }
}

/// Classify a non-success status; 408, 429 and 5xx are transient
pub fn status_error(
    context: &str,
    status: StatusCode,
    body: &str,
    permanent: fn(String) -> SemragError,
) -> SemragError {
    let message = format!("{context} returned {status}: {body}");
    match status.as_u16() {
        429 => SemragError::RateLimited(message),
        408 | 500..=599 => SemragError::Unavailable(message),
        _ => permanent(message),
    }
}

/// Turn a non-success response into an error, passing successes through
pub async fn check_response(
    context: &str,
    response: Response,
    permanent: fn(String) -> SemragError,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(context, status, &body, permanent))
}
