//! Engram Storage - Store Gateway
//!
//! Defines the storage abstraction over the long-term store: an async
//! backend trait, a retrying gateway that serializes writers behind a
//! process-wide mutex, a Postgres backend, and an in-memory mock for tests.
//!
//! The backend performs no semantic validation; it trusts inputs and
//! surfaces structural failures (missing row, malformed vector length) as
//! distinct errors. Transient serialization conflicts are reported as
//! `StoreError::Conflict` and retried by the gateway.

mod gateway;
mod mock;
pub mod pg;

pub use gateway::{InsertOutcome, StoreGateway};
pub use mock::MockStore;
pub use pg::{PgConfig, PgStore};

use async_trait::async_trait;
use engram_core::{
    AccessLogEntry, EmbeddingVector, EngramResult, ItemId, Memory, MemoryId, MemoryRelationship,
    RecallFilter, Session, SessionKey, Timestamp, UserId, WorkingItem,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for working-memory items.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    /// New pinned flag
    pub pinned: Option<bool>,
    /// New relevance score
    pub relevance: Option<f32>,
    /// New last-access timestamp
    pub last_accessed_at: Option<Timestamp>,
}

/// Update payload for long-term memories. Only set fields are written.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub embedding: Option<EmbeddingVector>,
    pub entities: Option<Vec<String>>,
    /// Pre-merged metadata; the manager merges, the store writes verbatim
    pub metadata: Option<serde_json::Value>,
    pub importance: Option<f32>,
    pub confidence: Option<f32>,
    pub is_temporal: Option<bool>,
    pub event_at: Option<Timestamp>,
    pub supersedes: Option<MemoryId>,
    pub updated_at: Option<Timestamp>,
}

impl MemoryUpdate {
    /// Whether any field is set.
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.summary.is_none()
            && self.embedding.is_none()
            && self.entities.is_none()
            && self.metadata.is_none()
            && self.importance.is_none()
            && self.confidence.is_none()
            && self.is_temporal.is_none()
            && self.event_at.is_none()
            && self.supersedes.is_none()
            && self.updated_at.is_none()
    }
}

// ============================================================================
// VECTOR SEARCH TYPES
// ============================================================================

/// Vector search request against a user's live memories.
#[derive(Debug, Clone)]
pub struct VectorSearchRequest {
    pub user_id: UserId,
    pub query: EmbeddingVector,
    pub filter: RecallFilter,
    /// Minimum cosine similarity in [-1, 1]
    pub min_similarity: f32,
    pub limit: usize,
}

/// One vector search hit, annotated with its cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchHit {
    pub memory: Memory,
    pub similarity: f32,
}

// ============================================================================
// APPEND-ONLY ROWS
// ============================================================================

/// Row for the append-only service-metrics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetricRow {
    pub operation: String,
    pub provider: String,
    pub latency_ms: i64,
    pub success: bool,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub recorded_at: Timestamp,
}

/// Row for the append-only tool-error-log table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolErrorRow {
    pub tool: String,
    pub code: String,
    pub message: String,
    pub occurred_at: Timestamp,
}

// ============================================================================
// STORE BACKEND TRAIT
// ============================================================================

/// Async storage backend over the five core tables plus the two append-only
/// auxiliary tables. Implementations: [`PgStore`] (production), [`MockStore`]
/// (tests).
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Cheap liveness probe for health reporting.
    async fn ping(&self) -> EngramResult<()>;

    // === Session Operations ===

    /// Get a session by key.
    async fn session_get(&self, key: &SessionKey) -> EngramResult<Option<Session>>;

    /// Insert or replace a session row.
    async fn session_put(&self, session: &Session) -> EngramResult<()>;

    // === Working-Memory Item Operations ===

    /// Insert a new item.
    async fn item_insert(&self, item: &WorkingItem) -> EngramResult<()>;

    /// Get an item by ID.
    async fn item_get(&self, id: ItemId) -> EngramResult<Option<WorkingItem>>;

    /// Update an item.
    async fn item_update(&self, id: ItemId, update: ItemUpdate) -> EngramResult<()>;

    /// All items of a session ordered by ascending sequence.
    async fn items_for_session(&self, key: &SessionKey) -> EngramResult<Vec<WorkingItem>>;

    /// Delete specific items of a session.
    async fn items_delete(&self, key: &SessionKey, ids: &[ItemId]) -> EngramResult<()>;

    /// Delete every item of a session.
    async fn items_clear(&self, key: &SessionKey) -> EngramResult<()>;

    // === Long-Term Memory Operations ===

    /// Insert a new memory.
    async fn memory_insert(&self, memory: &Memory) -> EngramResult<()>;

    /// Get a memory by ID (soft-deleted rows included).
    async fn memory_get(&self, id: MemoryId) -> EngramResult<Option<Memory>>;

    /// Update a memory.
    async fn memory_update(&self, id: MemoryId, update: MemoryUpdate) -> EngramResult<()>;

    /// Batched access bump: increments access_count and sets
    /// last_accessed_at for every listed memory in one write.
    async fn memory_touch(&self, ids: &[MemoryId], at: Timestamp) -> EngramResult<()>;

    /// Set or clear the soft-delete timestamp.
    async fn memory_set_deleted(
        &self,
        id: MemoryId,
        deleted_at: Option<Timestamp>,
    ) -> EngramResult<()>;

    /// Remove the row and prune every relationship referencing it.
    async fn memory_hard_delete(&self, id: MemoryId) -> EngramResult<()>;

    /// All memories of a user, optionally including soft-deleted rows.
    async fn memories_for_user(
        &self,
        user: &UserId,
        include_deleted: bool,
    ) -> EngramResult<Vec<Memory>>;

    /// GDPR erasure: hard-delete every row the user owns across all tables
    /// (memories, relationships, access log, sessions, items). Returns the
    /// number of memories removed.
    async fn memory_delete_all_for_user(&self, user: &UserId) -> EngramResult<u64>;

    /// Batched importance write used by apply-decay.
    async fn memory_set_importance(&self, updates: &[(MemoryId, f32)]) -> EngramResult<()>;

    /// Vector similarity search over a user's live memories, ordered by
    /// descending cosine similarity.
    async fn vector_search(
        &self,
        request: &VectorSearchRequest,
    ) -> EngramResult<Vec<VectorSearchHit>>;

    // === Relationship Operations ===

    /// Insert a relationship edge.
    async fn relationship_insert(&self, rel: &MemoryRelationship) -> EngramResult<()>;

    /// All edges touching a memory, in either direction.
    async fn relationships_for_memory(
        &self,
        id: MemoryId,
    ) -> EngramResult<Vec<MemoryRelationship>>;

    // === Append-Only Operations ===

    /// Append access-log entries.
    async fn access_log_insert(&self, entries: &[AccessLogEntry]) -> EngramResult<()>;

    /// Access-log entries for a user, newest first, up to `limit`.
    async fn access_log_for_user(
        &self,
        user: &UserId,
        limit: usize,
    ) -> EngramResult<Vec<AccessLogEntry>>;

    /// Append service-metric rows.
    async fn service_metrics_insert(&self, rows: &[ServiceMetricRow]) -> EngramResult<()>;

    /// Append a tool-error row.
    async fn tool_error_insert(&self, row: &ToolErrorRow) -> EngramResult<()>;
}
