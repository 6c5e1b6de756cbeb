//! Chat provider over the OpenAI-compatible completions endpoint

use super::client::OpenAiClient;
use super::types::{CompletionRequest, CompletionResponse, Message};
use crate::providers::invalid_response;
use crate::{ChatProvider, ChatRequest};
use async_trait::async_trait;
use engram_core::EngramResult;
use std::sync::Arc;

/// Chat provider for the configured model service.
pub struct OpenAiChatProvider {
    client: Arc<OpenAiClient>,
    model: String,
}

impl OpenAiChatProvider {
    /// Create a new chat provider.
    pub fn new(client: Arc<OpenAiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn complete(&self, request: ChatRequest) -> EngramResult<String> {
        let wire_request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system,
                },
                Message {
                    role: "user".to_string(),
                    content: request.user,
                },
            ],
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        };

        let response: CompletionResponse =
            self.client.request("chat/completions", wire_request).await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| invalid_response("model-service", "No completion in response"))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatProvider")
            .field("model", &self.model)
            .finish()
    }
}
