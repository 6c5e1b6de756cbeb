//! Embedding provider over the OpenAI-compatible embeddings endpoint

use super::client::OpenAiClient;
use super::types::{EmbeddingRequest, EmbeddingResponse};
use crate::providers::invalid_response;
use crate::EmbeddingProvider;
use async_trait::async_trait;
use engram_core::{EmbeddingVector, EngramResult};
use std::sync::Arc;

/// Embedding provider for the configured model service.
pub struct OpenAiEmbeddingProvider {
    client: Arc<OpenAiClient>,
    model: String,
    dimensions: i32,
}

impl OpenAiEmbeddingProvider {
    /// Create a new embedding provider.
    ///
    /// # Arguments
    /// * `client` - Shared service client
    /// * `model` - Embedding model identifier
    /// * `dimensions` - Configured dimension D
    pub fn new(client: Arc<OpenAiClient>, model: impl Into<String>, dimensions: i32) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> EngramResult<EmbeddingVector> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
            dimensions: Some(self.dimensions),
        };

        let response: EmbeddingResponse = self.client.request("embeddings", request).await?;

        let data = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("model-service", "No embedding data in response"))?;

        Ok(EmbeddingVector::new(data.embedding, self.model.clone()))
    }

    async fn embed_batch(&self, texts: &[String]) -> EngramResult<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
            dimensions: Some(self.dimensions),
        };

        let response: EmbeddingResponse = self.client.request("embeddings", request).await?;

        if response.data.len() != texts.len() {
            return Err(invalid_response(
                "model-service",
                format!(
                    "Expected {} embeddings but got {}",
                    texts.len(),
                    response.data.len()
                ),
            ));
        }

        // Response order matches request order per the contract
        Ok(response
            .data
            .into_iter()
            .map(|data| EmbeddingVector::new(data.embedding, self.model.clone()))
            .collect())
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingProvider")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
