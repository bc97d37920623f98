use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Completion, EmbeddingProvider, TextGenerator, TokenUsage};
use crate::config::{EmbeddingsConfig, ModelConfig};
use crate::error::{GenesisError, Result};

/// Request structure for the chat completions API
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsagePayload {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Request structure for the embeddings API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| GenesisError::Config(format!("Failed to build HTTP client: {}", e)))
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Rate limits and server errors are worth another attempt.
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(base_url: &str, api_key: String, model: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Build from a model section; reads the API key from its env var.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .map_err(|e| GenesisError::Config(e.to_string()))?;
        Self::new(&config.base_url, api_key, &config.model, config.timeout_secs)
    }
}

#[async_trait]
impl TextGenerator for OpenAiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, json_mode: bool, temperature: f32) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenesisError::Generation(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(GenesisError::Generation(format!("API error {}: {}", status, body)));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenesisError::Generation(format!("Failed to parse response: {}", e)))?;
        log::debug!("Chat completion took {:?}", start.elapsed());

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(Completion {
            text,
            usage: result.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

/// OpenAI-compatible embeddings client with retry on rate limits and server errors.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    max_retries: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: &str,
        dimensions: usize,
        max_retries: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.to_string(),
            api_key,
            model: model.to_string(),
            dimensions,
            max_retries,
        })
    }

    pub fn from_config(config: &EmbeddingsConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .map_err(|e| GenesisError::Config(e.to_string()))?;
        Self::new(
            &config.base_url,
            api_key,
            &config.model,
            config.dimensions,
            config.max_retries,
            config.timeout_secs,
        )
    }

    /// One request; the status is returned alongside errors so the caller can decide on retry.
    async fn embed_once(&self, text: &str) -> std::result::Result<Vec<f32>, (Option<StatusCode>, GenesisError)> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(endpoint(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| (None, GenesisError::Embedding(format!("Network error: {}", e))))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err((
                Some(status),
                GenesisError::Embedding(format!("API error {}: {}", status, body)),
            ));
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| {
            (None, GenesisError::Embedding(format!("Failed to parse response: {}", e)))
        })?;
        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| (None, GenesisError::Embedding("Empty response from API".to_string())))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.embed_once(text).await {
                Ok(embedding) => {
                    log::debug!("Embedding API call took {:?} (attempt {})", start.elapsed(), attempt + 1);
                    return Ok(embedding);
                }
                Err((Some(status), e)) if attempt < self.max_retries && is_retryable(status) => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err((_, e)) => return Err(e),
            }
        }
    }
}
