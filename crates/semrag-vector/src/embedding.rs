//! Embedding client for generating vector representations
//!
//! Supports OpenAI, Azure OpenAI and Ollama embedding APIs, plus an offline
//! feature-hashing embedder. Every client built by
//! [`create_embedding_client`] is wrapped in the configured retry policy.
//!
//! Author: hephaex@gmail.com

use crate::http::{build_client, check_response, transport_error};
use async_trait::async_trait;
use reqwest::Client;
use semrag_core::{LlmConfig, LlmProvider, Result, RetryPolicy, SemragError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    /// Backend name for logging
    fn name(&self) -> &str;
}

fn check_len(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(SemragError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

// ============================================================================
// OpenAI / Azure OpenAI Embedding Client
// ============================================================================

#[derive(Debug, Clone)]
enum Auth {
    Bearer(String),
    AzureKey(String),
}

/// OpenAI-compatible embedding API client (OpenAI or an Azure deployment)
pub struct OpenAiEmbedding {
    client: Client,
    url: String,
    auth: Auth,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    /// Create a client for the public OpenAI API
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            url: format!("{OPENAI_BASE_URL}/embeddings"),
            auth: Auth::Bearer(api_key.into()),
            model: model.into(),
            dimension,
        }
    }

    /// Create a client for an Azure OpenAI embedding deployment
    pub fn azure(
        endpoint: &str,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: &str,
        dimension: usize,
    ) -> Self {
        let deployment = deployment.into();
        Self {
            client: Client::new(),
            url: format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
            auth: Auth::AzureKey(api_key.into()),
            model: deployment,
            dimension,
        }
    }

    /// Override the API base URL (OpenAI-compatible gateways)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.url = format!("{}/embeddings", base_url.trim_end_matches('/'));
        self
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig, dimension: usize) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| SemragError::ConfigError("OpenAI API key required".to_string()))?;

        let mut embedding = match config.embedding_provider() {
            LlmProvider::Azure => {
                let endpoint = config.base_url.as_deref().ok_or_else(|| {
                    SemragError::ConfigError("Azure OpenAI endpoint required".to_string())
                })?;
                Self::azure(
                    endpoint,
                    api_key.clone(),
                    config.embedding_model.clone(),
                    &config.api_version,
                    dimension,
                )
            }
            _ => {
                let embedding =
                    Self::new(api_key.clone(), config.embedding_model.clone(), dimension);
                match config.base_url.as_deref() {
                    Some(base_url) => embedding.with_base_url(base_url),
                    None => embedding,
                }
            }
        };
        embedding.client = build_client(config.timeout_secs)?;
        Ok(embedding)
    }

    fn is_azure(&self) -> bool {
        matches!(self.auth, Auth::AzureKey(_))
    }

    /// text-embedding-3 models can shorten their output on request
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimension)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| SemragError::EmbeddingError("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingRequest {
            input: texts,
            // Azure routes by deployment in the URL
            model: (!self.is_azure()).then_some(self.model.as_str()),
            dimensions: self.requested_dimensions(),
        };

        let builder = self.client.post(&self.url).json(&request);
        let builder = match &self.auth {
            Auth::Bearer(key) => builder.header("Authorization", format!("Bearer {key}")),
            Auth::AzureKey(key) => builder.header("api-key", key),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error("Embedding request", e, SemragError::EmbeddingError))?;
        let response =
            check_response("Embedding request", response, SemragError::EmbeddingError).await?;

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            SemragError::EmbeddingError(format!("Failed to parse embedding response: {e}"))
        })?;

        if result.data.len() != texts.len() {
            return Err(SemragError::EmbeddingError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        // Sort by index and extract embeddings
        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);

        let vectors: Vec<Vec<f32>> = embeddings.into_iter().map(|e| e.embedding).collect();
        for vector in &vectors {
            check_len(vector, self.dimension)?;
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        if self.is_azure() {
            "azure-openai"
        } else {
            "openai"
        }
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dimension,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig, dimension: usize) -> Result<Self> {
        let mut embedding = Self::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            dimension,
        );
        embedding.client = build_client(config.timeout_secs)?;
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!(
                "{}/api/embeddings",
                self.base_url.trim_end_matches('/')
            ))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                transport_error("Ollama embedding request", e, SemragError::EmbeddingError)
            })?;
        let response = check_response(
            "Ollama embedding request",
            response,
            SemragError::EmbeddingError,
        )
        .await?;

        let result: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            SemragError::EmbeddingError(format!("Failed to parse embedding response: {e}"))
        })?;

        check_len(&result.embedding, self.dimension)?;
        Ok(result.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ============================================================================
// Hashing Embedding (offline)
// ============================================================================

/// Deterministic bag-of-words embedder using signed feature hashing
///
/// Texts sharing words score high under cosine similarity; texts differing
/// only in case or punctuation embed identically. No network access.
/// Token slots come from SHA-256, so stored vectors stay valid across
/// toolchain upgrades.
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
    }

    /// Embed synchronously
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for token in Self::tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut word = [0u8; 8];
            word.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(word);
            let slot = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

// ============================================================================
// Retry wrapper
// ============================================================================

/// Applies a [`RetryPolicy`] to every call of the wrapped client
pub struct RetryingEmbedding {
    inner: Box<dyn EmbeddingClient>,
    policy: RetryPolicy,
}

impl RetryingEmbedding {
    pub fn new(inner: Box<dyn EmbeddingClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EmbeddingClient for RetryingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.policy.run("embed", || self.inner.embed(text)).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.policy
            .run("embed_batch", || self.inner.embed_batch(texts))
            .await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create a retrying embedding client from config
pub fn create_embedding_client(
    config: &LlmConfig,
    dimension: usize,
    retry: &RetryPolicy,
) -> Result<Box<dyn EmbeddingClient>> {
    let inner: Box<dyn EmbeddingClient> = match config.embedding_provider() {
        LlmProvider::OpenAI | LlmProvider::Azure => {
            Box::new(OpenAiEmbedding::from_config(config, dimension)?)
        }
        LlmProvider::Ollama => Box::new(OllamaEmbedding::from_config(config, dimension)?),
        LlmProvider::Hashing => Box::new(HashingEmbedding::new(dimension)),
    };
    tracing::debug!(
        "Embedding client: {} (dimension {})",
        inner.name(),
        dimension
    );
    Ok(Box::new(RetryingEmbedding::new(inner, retry.clone())))
}

// ============================================================================
// Tests
// ============================================================================
