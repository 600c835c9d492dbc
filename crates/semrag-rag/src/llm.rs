//! LLM Client implementations
//!
//! Provides chat-completion clients for OpenAI, Azure OpenAI and Ollama,
//! and a retry wrapper applying the configured [`RetryPolicy`].
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use reqwest::Client;
use semrag_core::{
    ChatMessage, LlmClient, LlmConfig, LlmProvider, Result, RetryPolicy, SemragError,
};
use semrag_vector::http::{build_client, check_response, transport_error};
use serde::{Deserialize, Serialize};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// OpenAI / Azure OpenAI Client
// ============================================================================

#[derive(Debug, Clone)]
enum Auth {
    Bearer(String),
    AzureKey(String),
}

/// OpenAI-compatible chat completion client
pub struct OpenAiClient {
    client: Client,
    url: String,
    auth: Auth,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a new OpenAI client
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            client: Client::new(),
            url: format!("{OPENAI_BASE_URL}/chat/completions"),
            auth: Auth::Bearer(api_key.into()),
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    /// Create a client for an Azure OpenAI chat deployment
    pub fn azure(
        endpoint: &str,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        let deployment = deployment.into();
        Self {
            client: Client::new(),
            url: format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
            auth: Auth::AzureKey(api_key.into()),
            model: deployment,
            max_tokens,
            temperature,
        }
    }

    /// Set custom base URL (for OpenAI-compatible APIs)
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.url = format!("{}/chat/completions", url.trim_end_matches('/'));
        self
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| SemragError::ConfigError("OpenAI API key required".to_string()))?;

        let mut client = match config.provider {
            LlmProvider::Azure => {
                let endpoint = config.base_url.as_deref().ok_or_else(|| {
                    SemragError::ConfigError("Azure OpenAI endpoint required".to_string())
                })?;
                Self::azure(
                    endpoint,
                    api_key.clone(),
                    config.chat_model.clone(),
                    &config.api_version,
                    config.max_tokens,
                    config.temperature,
                )
            }
            _ => {
                let client = Self::new(
                    api_key.clone(),
                    config.chat_model.clone(),
                    config.max_tokens,
                    config.temperature,
                );
                match config.base_url.as_deref() {
                    Some(base_url) => client.with_base_url(base_url),
                    None => client,
                }
            }
        };
        client.client = build_client(config.timeout_secs)?;
        Ok(client)
    }

    fn is_azure(&self) -> bool {
        matches!(self.auth, Auth::AzureKey(_))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = OpenAiRequest {
            // Azure routes by deployment in the URL
            model: (!self.is_azure()).then_some(self.model.as_str()),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let builder = self.client.post(&self.url).json(&request);
        let builder = match &self.auth {
            Auth::Bearer(key) => builder.header("Authorization", format!("Bearer {key}")),
            Auth::AzureKey(key) => builder.header("api-key", key),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error("Chat request", e, SemragError::LlmError))?;
        let response = check_response("Chat request", response, SemragError::LlmError).await?;

        let result: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| SemragError::LlmError(format!("Failed to parse response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SemragError::LlmError("No response generated".to_string()))
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
// Ollama Client
// ============================================================================

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct OllamaResponse {
    message: OllamaMessage,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.ollama_url.clone(),
            model: config.chat_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = OllamaRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("Ollama request", e, SemragError::LlmError))?;
        let response = check_response("Ollama request", response, SemragError::LlmError).await?;

        let result: OllamaResponse = response
            .json()
            .await
            .map_err(|e| SemragError::LlmError(format!("Failed to parse Ollama response: {e}")))?;

        Ok(result.message.content)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ============================================================================
// Retry wrapper
// ============================================================================

/// Applies a [`RetryPolicy`] to every call of the wrapped client
pub struct RetryingLlm {
    inner: Box<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlm {
    pub fn new(inner: Box<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.policy.run("chat", || self.inner.chat(messages)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create a retrying LLM client from config
pub fn create_llm_client(config: &LlmConfig, retry: &RetryPolicy) -> Result<Box<dyn LlmClient>> {
    let inner: Box<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAI | LlmProvider::Azure => Box::new(OpenAiClient::from_config(config)?),
        LlmProvider::Ollama => Box::new(OllamaClient::from_config(config)?),
        LlmProvider::Hashing => {
            return Err(SemragError::ConfigError(
                "hashing provider cannot generate text".to_string(),
            ))
        }
    };
    Ok(Box::new(RetryingLlm::new(inner, retry.clone())))
}

// ============================================================================
// Tests
// ============================================================================
