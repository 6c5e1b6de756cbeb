//! Engram LLM - Model Gateway
//!
//! Provider-agnostic async traits for the model service plus the gateway
//! that the memory managers call. The gateway owns the process-wide
//! embedding cache and the metrics ring buffer, and implements the
//! classification/entity/intent operations with strict-JSON parsing and
//! warn-logged fallbacks.

pub mod cache;
pub mod metrics;
pub mod providers;

pub use cache::{CacheStats, EmbeddingCache};
pub use metrics::{MetricsRecorder, MetricsTotals, ModelCallRecord};
pub use providers::{OpenAiChatProvider, OpenAiClient, OpenAiEmbeddingProvider};

use async_trait::async_trait;
use engram_core::{
    compute_content_hash, estimate_tokens, is_valid_pair, EmbeddingVector, EngramResult, Intent,
    MemoryCategory, MemorySubtype,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// PROVIDER TRAITS
// ============================================================================

/// Async trait for embedding providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> EngramResult<EmbeddingVector>;

    /// Generate embeddings for multiple texts in a batch, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> EngramResult<Vec<EmbeddingVector>>;

    /// Get the number of dimensions this provider produces.
    fn dimensions(&self) -> i32;

    /// Get the model identifier for this provider.
    fn model_id(&self) -> &str;
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: i32,
    pub temperature: f32,
}

/// Async trait for chat providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one completion and return the raw assistant text.
    async fn complete(&self, request: ChatRequest) -> EngramResult<String>;

    /// Get the model identifier for this provider.
    fn model_id(&self) -> &str;
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Result of classifying content into the memory taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: MemoryCategory,
    pub subtype: MemorySubtype,
    pub importance: f32,
    pub entities: Vec<String>,
    pub is_temporal: bool,
    pub summary: Option<String>,
}

impl Classification {
    /// Fallback used when the model fails or returns unparseable output.
    pub fn fallback() -> Self {
        Self {
            category: MemoryCategory::Semantic,
            subtype: MemorySubtype::Domain,
            importance: 0.5,
            entities: Vec::new(),
            is_temporal: false,
            summary: None,
        }
    }
}

/// Wire shape of the model's classification answer.
#[derive(Debug, Deserialize)]
struct ClassificationJson {
    category: String,
    subtype: String,
    #[serde(default = "default_importance")]
    importance: f32,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    is_temporal: bool,
    #[serde(default)]
    summary: Option<String>,
}

fn default_importance() -> f32 {
    0.5
}

// ============================================================================
// PROMPTS
// ============================================================================

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify a piece of agent memory into a fixed taxonomy.\n\
Legal category/subtype pairs:\n\
- episodic: event, decision, conversation, outcome\n\
- semantic: user, project, environment, domain, entity\n\
- procedural: workflow, pattern, tool_usage, debugging\n\
- preference: communication, style, tools, boundaries\n\
Respond with STRICT JSON only, no prose, no code fences:\n\
{\"category\": \"...\", \"subtype\": \"...\", \"importance\": 0.0-1.0, \
\"entities\": [\"type:name\", ...], \"is_temporal\": true|false, \
\"summary\": \"one sentence or null\"}";

const ENTITY_SYSTEM_PROMPT: &str = "You extract named entities from agent memory content. \
Each entity is a \"type:name\" string, e.g. \"technology:postgresql\" or \"person:alice\". \
Respond with a STRICT JSON array of strings only, no prose, no code fences.";

const INTENT_SYSTEM_PROMPT: &str = "You detect the intent of a retrieval query. \
Respond with exactly one word from: how_to, what_happened, what_is, debug, general.";

const SUMMARIZE_SYSTEM_PROMPT: &str = "You summarize agent memory content. \
Respond with a concise summary only, no preamble.";

// ============================================================================
// MODEL GATEWAY
// ============================================================================

/// The model gateway. One instance is shared by every worker; it owns the
/// only two pieces of legitimately process-wide state (embedding cache,
/// metrics ring buffer).
pub struct ModelGateway {
    embedding: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatProvider>,
    cache: EmbeddingCache,
    metrics: Arc<MetricsRecorder>,
}

impl ModelGateway {
    pub fn new(embedding: Arc<dyn EmbeddingProvider>, chat: Arc<dyn ChatProvider>) -> Self {
        Self {
            embedding,
            chat,
            cache: EmbeddingCache::default(),
            metrics: Arc::new(MetricsRecorder::default()),
        }
    }

    /// Override the embedding-cache capacity (tests use small caches).
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = EmbeddingCache::new(capacity);
        self
    }

    /// The shared metrics recorder, for the flush job and analytics tools.
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Embedding dimension D of the configured provider.
    pub fn dimensions(&self) -> i32 {
        self.embedding.dimensions()
    }

    // ========================================================================
    // EMBED
    // ========================================================================

    /// Embed a single text. Deterministic per text within the process
    /// lifetime: cache hits bypass the model entirely.
    pub async fn embed(&self, text: &str) -> EngramResult<EmbeddingVector> {
        let hash = compute_content_hash(text.as_bytes());
        if let Some(cached) = self.cache.get(&hash) {
            return Ok(cached);
        }

        let start = Instant::now();
        let result = self.embedding.embed(text).await;
        let latency_ms = start.elapsed().as_millis() as i64;

        self.metrics.record(
            "embed",
            self.embedding.model_id(),
            latency_ms,
            result.is_ok(),
            estimate_tokens(text),
            0,
        );

        let embedding = result?;
        embedding.ensure_dimensions(self.embedding.dimensions())?;
        self.cache.insert(hash, embedding.clone());
        Ok(embedding)
    }

    /// Embed a list of texts, preserving order and populating the cache.
    /// Only cache misses are sent to the model.
    pub async fn embed_batch(&self, texts: &[String]) -> EngramResult<Vec<EmbeddingVector>> {
        let mut results: Vec<Option<EmbeddingVector>> = vec![None; texts.len()];
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let hash = compute_content_hash(text.as_bytes());
            match self.cache.get(&hash) {
                Some(cached) => results[i] = Some(cached),
                None => {
                    miss_indices.push(i);
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let start = Instant::now();
            let result = self.embedding.embed_batch(&miss_texts).await;
            let latency_ms = start.elapsed().as_millis() as i64;

            let input_tokens: i32 = miss_texts.iter().map(|t| estimate_tokens(t)).sum();
            self.metrics.record(
                "embed_batch",
                self.embedding.model_id(),
                latency_ms,
                result.is_ok(),
                input_tokens,
                0,
            );

            let embeddings = result?;
            for (slot, (text, embedding)) in miss_indices
                .iter()
                .zip(miss_texts.iter().zip(embeddings.into_iter()))
            {
                embedding.ensure_dimensions(self.embedding.dimensions())?;
                let hash = compute_content_hash(text.as_bytes());
                self.cache.insert(hash, embedding.clone());
                results[*slot] = Some(embedding);
            }
        }

        results
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    engram_core::EngramError::internal("Batch embedding left a slot unfilled")
                })
            })
            .collect()
    }

    // ========================================================================
    // CLASSIFY
    // ========================================================================

    /// Classify content into the taxonomy. Model failures and unparseable
    /// output are recovered with the fixed fallback; this operation has no
    /// error class visible to callers.
    pub async fn classify(&self, content: &str, context: Option<&str>) -> Classification {
        let user = match context {
            Some(ctx) => format!("Context: {}\n\nContent to classify:\n{}", ctx, content),
            None => format!("Content to classify:\n{}", content),
        };

        let start = Instant::now();
        let result = self
            .chat
            .complete(ChatRequest {
                system: CLASSIFY_SYSTEM_PROMPT.to_string(),
                user,
                max_tokens: 400,
                temperature: 0.0,
            })
            .await;
        let latency_ms = start.elapsed().as_millis() as i64;

        let raw = match result {
            Ok(raw) => {
                self.metrics.record(
                    "classify",
                    self.chat.model_id(),
                    latency_ms,
                    true,
                    estimate_tokens(content),
                    estimate_tokens(&raw),
                );
                raw
            }
            Err(e) => {
                self.metrics.record(
                    "classify",
                    self.chat.model_id(),
                    latency_ms,
                    false,
                    estimate_tokens(content),
                    0,
                );
                tracing::warn!(error = %e, "Classification call failed, using fallback");
                return Classification::fallback();
            }
        };

        match parse_classification(&raw) {
            Some(classification) => classification,
            None => {
                tracing::warn!("Unparseable classification output, using fallback");
                Classification::fallback()
            }
        }
    }

    // ========================================================================
    // EXTRACT ENTITIES
    // ========================================================================

    /// Extract "type:name" entities. Failures recover to an empty list.
    pub async fn extract_entities(&self, content: &str) -> Vec<String> {
        let start = Instant::now();
        let result = self
            .chat
            .complete(ChatRequest {
                system: ENTITY_SYSTEM_PROMPT.to_string(),
                user: content.to_string(),
                max_tokens: 300,
                temperature: 0.0,
            })
            .await;
        let latency_ms = start.elapsed().as_millis() as i64;

        let raw = match result {
            Ok(raw) => {
                self.metrics.record(
                    "extract_entities",
                    self.chat.model_id(),
                    latency_ms,
                    true,
                    estimate_tokens(content),
                    estimate_tokens(&raw),
                );
                raw
            }
            Err(e) => {
                self.metrics.record(
                    "extract_entities",
                    self.chat.model_id(),
                    latency_ms,
                    false,
                    estimate_tokens(content),
                    0,
                );
                tracing::warn!(error = %e, "Entity extraction failed, returning empty list");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<String>>(strip_code_fences(&raw)) {
            Ok(entities) => entities
                .into_iter()
                .filter(|e| e.contains(':'))
                .collect(),
            Err(_) => {
                tracing::warn!("Unparseable entity output, returning empty list");
                Vec::new()
            }
        }
    }

    // ========================================================================
    // DETECT INTENT
    // ========================================================================

    /// Detect query intent. Defaults to `General` on any ambiguity or
    /// failure; this operation has no retryable failure class.
    pub async fn detect_intent(&self, query: &str) -> Intent {
        let start = Instant::now();
        let result = self
            .chat
            .complete(ChatRequest {
                system: INTENT_SYSTEM_PROMPT.to_string(),
                user: query.to_string(),
                max_tokens: 10,
                temperature: 0.0,
            })
            .await;
        let latency_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(raw) => {
                self.metrics.record(
                    "detect_intent",
                    self.chat.model_id(),
                    latency_ms,
                    true,
                    estimate_tokens(query),
                    estimate_tokens(&raw),
                );
                Intent::from_model_output(&raw)
            }
            Err(e) => {
                self.metrics.record(
                    "detect_intent",
                    self.chat.model_id(),
                    latency_ms,
                    false,
                    estimate_tokens(query),
                    0,
                );
                tracing::warn!(error = %e, "Intent detection failed, defaulting to general");
                Intent::General
            }
        }
    }

    // ========================================================================
    // SUMMARIZE
    // ========================================================================

    /// Summarize content. Unlike classification, failures surface to the
    /// caller since summaries are optional everywhere they are used.
    pub async fn summarize(&self, content: &str, max_tokens: i32) -> EngramResult<String> {
        let start = Instant::now();
        let result = self
            .chat
            .complete(ChatRequest {
                system: SUMMARIZE_SYSTEM_PROMPT.to_string(),
                user: content.to_string(),
                max_tokens,
                temperature: 0.3,
            })
            .await;
        let latency_ms = start.elapsed().as_millis() as i64;

        self.metrics.record(
            "summarize",
            self.chat.model_id(),
            latency_ms,
            result.is_ok(),
            estimate_tokens(content),
            result.as_ref().map(|s| estimate_tokens(s)).unwrap_or(0),
        );

        result
    }
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("embedding_model", &self.embedding.model_id())
            .field("chat_model", &self.chat.model_id())
            .field("cache", &self.cache)
            .finish()
    }
}

// ============================================================================
// PARSING HELPERS
// ============================================================================

/// Strip markdown code fences some models wrap around JSON.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn parse_classification(raw: &str) -> Option<Classification> {
    let parsed: ClassificationJson = serde_json::from_str(strip_code_fences(raw)).ok()?;
    let category: MemoryCategory = parsed.category.parse().ok()?;
    let subtype: MemorySubtype = parsed.subtype.parse().ok()?;
    if !is_valid_pair(category, subtype) {
        return None;
    }
    Some(Classification {
        category,
        subtype,
        importance: parsed.importance.clamp(0.0, 1.0),
        entities: parsed.entities.into_iter().filter(|e| e.contains(':')).collect(),
        is_temporal: parsed.is_temporal,
        summary: parsed.summary.filter(|s| !s.trim().is_empty()),
    })
}

// ============================================================================
// MOCK PROVIDERS
// ============================================================================

/// Mock embedding provider for testing. Embeddings are a normalized byte
/// fold of the input, so identical texts always embed identically and
/// similar texts score high cosine similarity.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    model_id: String,
    dimensions: i32,
}

impl MockEmbeddingProvider {
    pub fn new(model_id: impl Into<String>, dimensions: i32) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions,
        }
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut data = vec![0.0f32; self.dimensions as usize];

        for (i, byte) in text.bytes().enumerate() {
            let idx = i % self.dimensions as usize;
            data[idx] += (byte as f32) / 255.0;
        }

        let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut data {
                *x /= norm;
            }
        }

        data
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> EngramResult<EmbeddingVector> {
        let data = self.generate_embedding(text);
        Ok(EmbeddingVector::new(data, self.model_id.clone()))
    }

    async fn embed_batch(&self, texts: &[String]) -> EngramResult<Vec<EmbeddingVector>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Mock chat provider for testing. Returns queued responses in order, then
/// falls back to a default response.
#[derive(Debug)]
pub struct MockChatProvider {
    model_id: String,
    responses: std::sync::Mutex<std::collections::VecDeque<String>>,
    default_response: String,
}

impl MockChatProvider {
    pub fn new() -> Self {
        Self {
            model_id: "mock-chat".to_string(),
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            default_response: "general".to_string(),
        }
    }

    /// Set the response returned when the queue is empty.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Queue a response to return for the next call.
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("mock responses poisoned")
            .push_back(response.into());
    }
}

impl Default for MockChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn complete(&self, _request: ChatRequest) -> EngramResult<String> {
        let queued = self
            .responses
            .lock()
            .expect("mock responses poisoned")
            .pop_front();
        Ok(queued.unwrap_or_else(|| self.default_response.clone()))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> ModelGateway {
        ModelGateway::new(
            Arc::new(MockEmbeddingProvider::new("mock-embed", 64)),
            Arc::new(MockChatProvider::new()),
        )
    }

    fn gateway_with_chat(chat: MockChatProvider) -> ModelGateway {
        ModelGateway::new(
            Arc::new(MockEmbeddingProvider::new("mock-embed", 64)),
            Arc::new(chat),
        )
    }

    #[tokio::test]
    async fn test_embed_deterministic_via_cache() {
        let gateway = gateway();
        let a = gateway.embed("hello world").await.unwrap();
        let b = gateway.embed("hello world").await.unwrap();
        assert_eq!(a, b);

        let stats = gateway.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_embed_records_metrics_once_per_miss() {
        let gateway = gateway();
        gateway.embed("first").await.unwrap();
        gateway.embed("first").await.unwrap();
        gateway.embed("second").await.unwrap();

        // Cache hit does not reach the model, so only two calls recorded
        assert_eq!(gateway.metrics().totals().calls, 2);
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order_and_fills_cache() {
        let gateway = gateway();
        // Warm one entry so the batch mixes hits and misses
        let warm = gateway.embed("beta").await.unwrap();

        let texts = vec![
            "alpha".to_string(),
            "beta".to_string(),
            "gamma".to_string(),
        ];
        let batch = gateway.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[1], warm);
        assert_eq!(batch[0], gateway.embed("alpha").await.unwrap());
        assert_eq!(gateway.cache_stats().size, 3);
    }

    #[tokio::test]
    async fn test_classify_parses_strict_json() {
        let chat = MockChatProvider::new();
        chat.push_response(
            r#"{"category": "procedural", "subtype": "workflow", "importance": 0.8,
                "entities": ["tool:cargo"], "is_temporal": false, "summary": "Build steps"}"#,
        );
        let gateway = gateway_with_chat(chat);

        let classification = gateway.classify("run cargo build then test", None).await;
        assert_eq!(classification.category, MemoryCategory::Procedural);
        assert_eq!(classification.subtype, MemorySubtype::Workflow);
        assert_eq!(classification.importance, 0.8);
        assert_eq!(classification.entities, vec!["tool:cargo".to_string()]);
        assert_eq!(classification.summary.as_deref(), Some("Build steps"));
    }

    #[tokio::test]
    async fn test_classify_tolerates_code_fences() {
        let chat = MockChatProvider::new();
        chat.push_response(
            "```json\n{\"category\": \"episodic\", \"subtype\": \"decision\"}\n```",
        );
        let gateway = gateway_with_chat(chat);

        let classification = gateway.classify("we chose postgres", None).await;
        assert_eq!(classification.category, MemoryCategory::Episodic);
        assert_eq!(classification.subtype, MemorySubtype::Decision);
        // Defaulted fields
        assert_eq!(classification.importance, 0.5);
    }

    #[tokio::test]
    async fn test_classify_falls_back_on_garbage() {
        let chat = MockChatProvider::new();
        chat.push_response("I think this is probably semantic?");
        let gateway = gateway_with_chat(chat);

        let classification = gateway.classify("anything", None).await;
        assert_eq!(classification, Classification::fallback());
    }

    #[tokio::test]
    async fn test_classify_rejects_invalid_pair() {
        let chat = MockChatProvider::new();
        chat.push_response(r#"{"category": "episodic", "subtype": "workflow"}"#);
        let gateway = gateway_with_chat(chat);

        let classification = gateway.classify("anything", None).await;
        assert_eq!(classification, Classification::fallback());
    }

    #[tokio::test]
    async fn test_extract_entities() {
        let chat = MockChatProvider::new();
        chat.push_response(r#"["technology:postgresql", "project:api", "not-an-entity"]"#);
        let gateway = gateway_with_chat(chat);

        let entities = gateway.extract_entities("the api uses postgres").await;
        // Strings without a type prefix are dropped
        assert_eq!(
            entities,
            vec!["technology:postgresql".to_string(), "project:api".to_string()]
        );
    }

    #[tokio::test]
    async fn test_extract_entities_empty_on_parse_failure() {
        let chat = MockChatProvider::new();
        chat.push_response("there are no entities here");
        let gateway = gateway_with_chat(chat);

        assert!(gateway.extract_entities("content").await.is_empty());
    }

    #[tokio::test]
    async fn test_detect_intent_single_word() {
        let chat = MockChatProvider::new();
        chat.push_response("how_to");
        chat.push_response("what-happened");
        chat.push_response("nonsense answer");
        let gateway = gateway_with_chat(chat);

        assert_eq!(gateway.detect_intent("how do I deploy?").await, Intent::HowTo);
        assert_eq!(
            gateway.detect_intent("what did we decide?").await,
            Intent::WhatHappened
        );
        assert_eq!(gateway.detect_intent("???").await, Intent::General);
    }

    #[tokio::test]
    async fn test_summarize_passes_through() {
        let chat = MockChatProvider::new();
        chat.push_response("A short summary.");
        let gateway = gateway_with_chat(chat);

        let summary = gateway.summarize("long content ...", 100).await.unwrap();
        assert_eq!(summary, "A short summary.");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_mock_embedding_correct_dimensions(
            dimensions in 1i32..512i32,
            text in ".{1,100}"
        ) {
            let provider = MockEmbeddingProvider::new("test", dimensions);
            let rt = tokio::runtime::Runtime::new().unwrap();
            let embedding = rt.block_on(provider.embed(&text)).unwrap();

            prop_assert_eq!(embedding.dimensions, dimensions);
            prop_assert_eq!(embedding.data.len(), dimensions as usize);
        }

        #[test]
        fn prop_mock_embedding_deterministic(
            dimensions in 1i32..256i32,
            text in ".{1,100}"
        ) {
            let provider = MockEmbeddingProvider::new("test", dimensions);
            let rt = tokio::runtime::Runtime::new().unwrap();
            let e1 = rt.block_on(provider.embed(&text)).unwrap();
            let e2 = rt.block_on(provider.embed(&text)).unwrap();

            prop_assert_eq!(e1.data, e2.data);
        }
    }
}
