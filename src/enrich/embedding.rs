use std::sync::Arc;

use crate::llm::EmbeddingProvider;

/// Produces fixed-dimension embeddings; anything else is `None`.
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimensions: usize) -> Self {
        Self {
            provider,
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn generate(&self, text: &str) -> Option<Vec<f32>> {
        let flattened = text.replace(['\r', '\n'], " ");
        if flattened.trim().is_empty() {
            return None;
        }

        match self.provider.embed(&flattened).await {
            Ok(embedding) if embedding.len() == self.dimensions => Some(embedding),
            Ok(embedding) => {
                log::warn!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    embedding.len()
                );
                None
            }
            Err(e) => {
                log::warn!("Embedding generation failed: {}", e);
                None
            }
        }
    }
}
