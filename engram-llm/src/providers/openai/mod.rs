//! OpenAI-compatible model-service provider
//!
//! The model-service contract is an embedding endpoint plus a chat endpoint
//! returning strict JSON or single-word answers. Any host implementing the
//! OpenAI wire format satisfies it.

mod chat;
mod client;
mod embedding;
mod types;

pub use chat::OpenAiChatProvider;
pub use client::OpenAiClient;
pub use embedding::OpenAiEmbeddingProvider;
