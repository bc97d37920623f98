//! Model provider capabilities: text generation and embeddings.

pub mod openai;

pub use openai::{OpenAiChat, OpenAiEmbedder};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Token counts reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Raw text returned by a generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// None when the provider did not report usage
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, for reports.
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str, json_mode: bool, temperature: f32) -> Result<Completion>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimensionality requested from the provider.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
