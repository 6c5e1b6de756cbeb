//! Core entity structures

use crate::*;
use serde::{Deserialize, Serialize};

/// Session - a bounded conversational context with a token budget and a bag
/// of ordered working-memory items. Created on first reference, updated on
/// every working-memory operation, never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_key: SessionKey,
    pub user_id: UserId,
    pub org_id: Option<String>,
    /// Maximum token capacity; appends beyond this trigger eviction
    pub max_tokens: i32,
    /// Running total; invariant: equals the sum of live item token counts
    pub current_tokens: i32,
    pub created_at: Timestamp,
    pub last_active_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub config: Option<serde_json::Value>,
}

impl Session {
    /// Whether the session is past its expiry and should be treated as absent.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Working-memory item - session-scoped, volatile, subject to eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingItem {
    pub item_id: ItemId,
    pub session_key: SessionKey,
    pub content_type: ContentType,
    pub content: String,
    /// Pre-computed at append time with the deterministic estimator
    pub token_count: i32,
    /// Relevance score in [0, 1]
    pub relevance: f32,
    /// Pinned items are protected from eviction
    pub pinned: bool,
    /// Strictly increasing within a session
    pub sequence: i64,
    pub created_at: Timestamp,
    pub last_accessed_at: Timestamp,
}

/// Long-term memory - persistent, user-scoped, vector-indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: MemoryId,
    pub user_id: UserId,
    pub category: MemoryCategory,
    pub subtype: MemorySubtype,
    pub content: String,
    pub summary: Option<String>,
    /// Non-null, exactly the configured dimension
    pub embedding: EmbeddingVector,
    /// Named entities as "type:name" strings
    pub entities: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    /// When the remembered event happened, if temporal
    pub event_at: Option<Timestamp>,
    pub is_temporal: bool,
    /// Importance in [0, 1]; decays under apply-decay
    pub importance: f32,
    pub access_count: i32,
    /// In (0, 1]
    pub decay_factor: f32,
    /// The memory this one replaced; the referenced memory is soft-deleted
    pub supersedes: Option<MemoryId>,
    pub source_session: Option<SessionKey>,
    pub source_type: SourceType,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub created_at: Timestamp,
    pub last_accessed_at: Timestamp,
    pub updated_at: Timestamp,
    /// Soft-delete marker; set rows are invisible to retrieval
    pub deleted_at: Option<Timestamp>,
}

impl Memory {
    /// Whether this memory is visible to retrieval.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Directed relationship edge between two memories of the same user.
/// Stored as an edge list; the graph may contain cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRelationship {
    pub relationship_id: RelationshipId,
    pub source_id: MemoryId,
    pub target_id: MemoryId,
    pub kind: RelationshipKind,
    /// Strength in [0, 1]
    pub strength: f32,
    pub context: Option<String>,
    pub created_at: Timestamp,
    pub created_by: String,
}

/// Access-log entry recording one retrieval of one memory.
/// Append-only; used for analytics, never for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub access_id: AccessId,
    pub memory_id: MemoryId,
    pub session_key: Option<SessionKey>,
    pub user_id: UserId,
    pub query: String,
    /// Cosine similarity that selected this memory
    pub similarity: f32,
    pub was_useful: Option<bool>,
    pub was_used: Option<bool>,
    pub accessed_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let mut session = Session {
            session_key: SessionKey::new("s1"),
            user_id: UserId::new("u1"),
            org_id: None,
            max_tokens: 8000,
            current_tokens: 0,
            created_at: now,
            last_active_at: now,
            expires_at: None,
            config: None,
        };
        assert!(!session.is_expired(now));

        session.expires_at = Some(now - Duration::seconds(1));
        assert!(session.is_expired(now));

        session.expires_at = Some(now + Duration::hours(1));
        assert!(!session.is_expired(now));
    }

    #[test]
    fn test_memory_liveness() {
        let now = Utc::now();
        let mut memory = Memory {
            memory_id: MemoryId::now_v7(),
            user_id: UserId::new("u1"),
            category: MemoryCategory::Semantic,
            subtype: MemorySubtype::Project,
            content: "Project uses PostgreSQL 15".to_string(),
            summary: None,
            embedding: EmbeddingVector::new(vec![0.0; 8], "test".to_string()),
            entities: vec!["technology:postgresql".to_string()],
            metadata: None,
            event_at: None,
            is_temporal: false,
            importance: 0.7,
            access_count: 0,
            decay_factor: 1.0,
            supersedes: None,
            source_session: None,
            source_type: SourceType::Explicit,
            confidence: 1.0,
            created_at: now,
            last_accessed_at: now,
            updated_at: now,
            deleted_at: None,
        };
        assert!(memory.is_live());
        memory.deleted_at = Some(now);
        assert!(!memory.is_live());
    }
}
