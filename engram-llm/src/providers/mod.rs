//! Model-service provider implementations
//!
//! Concrete implementations of the EmbeddingProvider and ChatProvider
//! traits. The service speaks an OpenAI-compatible wire format; the base
//! URL may point at any host implementing the contract.

pub mod openai;

pub use openai::{OpenAiChatProvider, OpenAiClient, OpenAiEmbeddingProvider};

use engram_core::{EngramError, ModelError};

/// Helper for invalid-response errors.
pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> EngramError {
    EngramError::Model(ModelError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    })
}
