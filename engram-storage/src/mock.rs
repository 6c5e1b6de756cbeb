//! In-memory mock backend for testing
//!
//! Behaves like the production backend over HashMaps: exact cosine scan for
//! vector search, the same soft-delete and user-scoping rules, and optional
//! conflict injection so gateway retry behavior can be exercised.

use crate::{
    ItemUpdate, MemoryUpdate, ServiceMetricRow, StoreBackend, ToolErrorRow, VectorSearchHit,
    VectorSearchRequest,
};
use async_trait::async_trait;
use engram_core::{
    AccessLogEntry, EngramResult, EntityType, ItemId, Memory, MemoryId, MemoryRelationship,
    Session, SessionKey, StoreError, Timestamp, UserId, WorkingItem,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

/// In-memory mock storage for testing.
#[derive(Debug, Default)]
pub struct MockStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
    items: RwLock<HashMap<ItemId, WorkingItem>>,
    memories: RwLock<HashMap<MemoryId, Memory>>,
    relationships: RwLock<HashMap<engram_core::RelationshipId, MemoryRelationship>>,
    access_log: RwLock<Vec<AccessLogEntry>>,
    service_metrics: RwLock<Vec<ServiceMetricRow>>,
    tool_errors: RwLock<Vec<ToolErrorRow>>,
    /// Writes fail with a serialization conflict while this is nonzero
    conflicts_remaining: AtomicU32,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write operations fail with a serialization
    /// conflict, as the single-writer store does under contention.
    pub fn fail_next_writes(&self, n: u32) {
        self.conflicts_remaining.store(n, Ordering::SeqCst);
    }

    fn check_conflict(&self) -> EngramResult<()> {
        loop {
            let remaining = self.conflicts_remaining.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(());
            }
            if self
                .conflicts_remaining
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(StoreError::Conflict {
                    reason: "injected serialization conflict".to_string(),
                }
                .into());
            }
        }
    }

    pub fn memory_count(&self) -> usize {
        self.memories.read().unwrap().len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.read().unwrap().len()
    }

    pub fn access_log_len(&self) -> usize {
        self.access_log.read().unwrap().len()
    }

    pub fn service_metrics_len(&self) -> usize {
        self.service_metrics.read().unwrap().len()
    }

    pub fn tool_error_len(&self) -> usize {
        self.tool_errors.read().unwrap().len()
    }
}

#[async_trait]
impl StoreBackend for MockStore {
    async fn ping(&self) -> EngramResult<()> {
        Ok(())
    }

    // === Sessions ===

    async fn session_get(&self, key: &SessionKey) -> EngramResult<Option<Session>> {
        Ok(self.sessions.read().unwrap().get(key).cloned())
    }

    async fn session_put(&self, session: &Session) -> EngramResult<()> {
        self.check_conflict()?;
        self.sessions
            .write()
            .unwrap()
            .insert(session.session_key.clone(), session.clone());
        Ok(())
    }

    // === Working-Memory Items ===

    async fn item_insert(&self, item: &WorkingItem) -> EngramResult<()> {
        self.check_conflict()?;
        self.items
            .write()
            .unwrap()
            .insert(item.item_id, item.clone());
        Ok(())
    }

    async fn item_get(&self, id: ItemId) -> EngramResult<Option<WorkingItem>> {
        Ok(self.items.read().unwrap().get(&id).cloned())
    }

    async fn item_update(&self, id: ItemId, update: ItemUpdate) -> EngramResult<()> {
        self.check_conflict()?;
        let mut items = self.items.write().unwrap();
        let item = items.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity_type: EntityType::WorkingItem,
            id: id.to_string(),
        })?;
        if let Some(pinned) = update.pinned {
            item.pinned = pinned;
        }
        if let Some(relevance) = update.relevance {
            item.relevance = relevance;
        }
        if let Some(at) = update.last_accessed_at {
            item.last_accessed_at = at;
        }
        Ok(())
    }

    async fn items_for_session(&self, key: &SessionKey) -> EngramResult<Vec<WorkingItem>> {
        let mut items: Vec<WorkingItem> = self
            .items
            .read()
            .unwrap()
            .values()
            .filter(|item| &item.session_key == key)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.sequence);
        Ok(items)
    }

    async fn items_delete(&self, key: &SessionKey, ids: &[ItemId]) -> EngramResult<()> {
        self.check_conflict()?;
        let mut items = self.items.write().unwrap();
        for id in ids {
            if let Some(item) = items.get(id) {
                if &item.session_key == key {
                    items.remove(id);
                }
            }
        }
        Ok(())
    }

    async fn items_clear(&self, key: &SessionKey) -> EngramResult<()> {
        self.check_conflict()?;
        self.items
            .write()
            .unwrap()
            .retain(|_, item| &item.session_key != key);
        Ok(())
    }

    // === Long-Term Memories ===

    async fn memory_insert(&self, memory: &Memory) -> EngramResult<()> {
        self.check_conflict()?;
        self.memories
            .write()
            .unwrap()
            .insert(memory.memory_id, memory.clone());
        Ok(())
    }

    async fn memory_get(&self, id: MemoryId) -> EngramResult<Option<Memory>> {
        Ok(self.memories.read().unwrap().get(&id).cloned())
    }

    async fn memory_update(&self, id: MemoryId, update: MemoryUpdate) -> EngramResult<()> {
        self.check_conflict()?;
        let mut memories = self.memories.write().unwrap();
        let memory = memories.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity_type: EntityType::Memory,
            id: id.to_string(),
        })?;
        if let Some(content) = update.content {
            memory.content = content;
        }
        if let Some(summary) = update.summary {
            memory.summary = Some(summary);
        }
        if let Some(embedding) = update.embedding {
            memory.embedding = embedding;
        }
        if let Some(entities) = update.entities {
            memory.entities = entities;
        }
        if let Some(metadata) = update.metadata {
            memory.metadata = Some(metadata);
        }
        if let Some(importance) = update.importance {
            memory.importance = importance;
        }
        if let Some(confidence) = update.confidence {
            memory.confidence = confidence;
        }
        if let Some(is_temporal) = update.is_temporal {
            memory.is_temporal = is_temporal;
        }
        if let Some(event_at) = update.event_at {
            memory.event_at = Some(event_at);
        }
        if let Some(supersedes) = update.supersedes {
            memory.supersedes = Some(supersedes);
        }
        if let Some(updated_at) = update.updated_at {
            memory.updated_at = updated_at;
        }
        Ok(())
    }

    async fn memory_touch(&self, ids: &[MemoryId], at: Timestamp) -> EngramResult<()> {
        self.check_conflict()?;
        let mut memories = self.memories.write().unwrap();
        for id in ids {
            if let Some(memory) = memories.get_mut(id) {
                memory.access_count += 1;
                memory.last_accessed_at = at;
            }
        }
        Ok(())
    }

    async fn memory_set_deleted(
        &self,
        id: MemoryId,
        deleted_at: Option<Timestamp>,
    ) -> EngramResult<()> {
        self.check_conflict()?;
        let mut memories = self.memories.write().unwrap();
        let memory = memories.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity_type: EntityType::Memory,
            id: id.to_string(),
        })?;
        memory.deleted_at = deleted_at;
        Ok(())
    }

    async fn memory_hard_delete(&self, id: MemoryId) -> EngramResult<()> {
        self.check_conflict()?;
        let removed = self.memories.write().unwrap().remove(&id);
        if removed.is_none() {
            return Err(StoreError::NotFound {
                entity_type: EntityType::Memory,
                id: id.to_string(),
            }
            .into());
        }
        // Relationships are owned jointly by their endpoints and pruned
        // when either endpoint is hard-deleted.
        self.relationships
            .write()
            .unwrap()
            .retain(|_, rel| rel.source_id != id && rel.target_id != id);
        Ok(())
    }

    async fn memories_for_user(
        &self,
        user: &UserId,
        include_deleted: bool,
    ) -> EngramResult<Vec<Memory>> {
        let mut memories: Vec<Memory> = self
            .memories
            .read()
            .unwrap()
            .values()
            .filter(|m| &m.user_id == user && (include_deleted || m.is_live()))
            .cloned()
            .collect();
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(memories)
    }

    async fn memory_delete_all_for_user(&self, user: &UserId) -> EngramResult<u64> {
        self.check_conflict()?;

        let removed_ids: Vec<MemoryId> = {
            let mut memories = self.memories.write().unwrap();
            let ids: Vec<MemoryId> = memories
                .values()
                .filter(|m| &m.user_id == user)
                .map(|m| m.memory_id)
                .collect();
            for id in &ids {
                memories.remove(id);
            }
            ids
        };

        self.relationships.write().unwrap().retain(|_, rel| {
            !removed_ids.contains(&rel.source_id) && !removed_ids.contains(&rel.target_id)
        });
        self.access_log
            .write()
            .unwrap()
            .retain(|entry| &entry.user_id != user);

        let session_keys: Vec<SessionKey> = {
            let mut sessions = self.sessions.write().unwrap();
            let keys: Vec<SessionKey> = sessions
                .values()
                .filter(|s| &s.user_id == user)
                .map(|s| s.session_key.clone())
                .collect();
            for key in &keys {
                sessions.remove(key);
            }
            keys
        };
        self.items
            .write()
            .unwrap()
            .retain(|_, item| !session_keys.contains(&item.session_key));

        Ok(removed_ids.len() as u64)
    }

    async fn memory_set_importance(&self, updates: &[(MemoryId, f32)]) -> EngramResult<()> {
        self.check_conflict()?;
        let mut memories = self.memories.write().unwrap();
        for (id, importance) in updates {
            if let Some(memory) = memories.get_mut(id) {
                memory.importance = *importance;
            }
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        request: &VectorSearchRequest,
    ) -> EngramResult<Vec<VectorSearchHit>> {
        let memories = self.memories.read().unwrap();
        let mut hits: Vec<VectorSearchHit> = Vec::new();

        for memory in memories.values() {
            if memory.user_id != request.user_id || !memory.is_live() {
                continue;
            }
            if !request.filter.matches(
                memory.category,
                memory.subtype,
                &memory.entities,
                memory.event_at,
                memory.confidence,
            ) {
                continue;
            }
            let similarity = memory.embedding.cosine_similarity(&request.query)?;
            if similarity >= request.min_similarity {
                hits.push(VectorSearchHit {
                    memory: memory.clone(),
                    similarity,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(request.limit);
        Ok(hits)
    }

    // === Relationships ===

    async fn relationship_insert(&self, rel: &MemoryRelationship) -> EngramResult<()> {
        self.check_conflict()?;
        self.relationships
            .write()
            .unwrap()
            .insert(rel.relationship_id, rel.clone());
        Ok(())
    }

    async fn relationships_for_memory(
        &self,
        id: MemoryId,
    ) -> EngramResult<Vec<MemoryRelationship>> {
        let mut rels: Vec<MemoryRelationship> = self
            .relationships
            .read()
            .unwrap()
            .values()
            .filter(|rel| rel.source_id == id || rel.target_id == id)
            .cloned()
            .collect();
        rels.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rels)
    }

    // === Append-Only Tables ===

    async fn access_log_insert(&self, entries: &[AccessLogEntry]) -> EngramResult<()> {
        self.check_conflict()?;
        self.access_log
            .write()
            .unwrap()
            .extend(entries.iter().cloned());
        Ok(())
    }

    async fn access_log_for_user(
        &self,
        user: &UserId,
        limit: usize,
    ) -> EngramResult<Vec<AccessLogEntry>> {
        let log = self.access_log.read().unwrap();
        let mut entries: Vec<AccessLogEntry> = log
            .iter()
            .filter(|entry| &entry.user_id == user)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn service_metrics_insert(&self, rows: &[ServiceMetricRow]) -> EngramResult<()> {
        self.check_conflict()?;
        self.service_metrics
            .write()
            .unwrap()
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn tool_error_insert(&self, row: &ToolErrorRow) -> EngramResult<()> {
        self.check_conflict()?;
        self.tool_errors.write().unwrap().push(row.clone());
        Ok(())
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::Utc;
    use engram_core::{EmbeddingVector, MemoryCategory, MemorySubtype, RecallFilter, SourceType};
    use proptest::prelude::*;

    fn memory_with_embedding(user: &str, data: Vec<f32>) -> Memory {
        let now = Utc::now();
        Memory {
            memory_id: MemoryId::now_v7(),
            user_id: UserId::new(user),
            category: MemoryCategory::Semantic,
            subtype: MemorySubtype::Domain,
            content: "content".to_string(),
            summary: None,
            embedding: EmbeddingVector::new(data, "test".to_string()),
            entities: vec![],
            metadata: None,
            event_at: None,
            is_temporal: false,
            importance: 0.5,
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
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Search results are user-scoped, similarity-ordered, above the
        /// floor, and bounded by the limit.
        #[test]
        fn prop_vector_search_ordered_and_bounded(
            embeddings in prop::collection::vec(
                prop::collection::vec(-1.0f32..=1.0, 4),
                0..16
            ),
            foreign in prop::collection::vec(
                prop::collection::vec(-1.0f32..=1.0, 4),
                0..8
            ),
            min_similarity in -1.0f32..=1.0,
            limit in 0usize..8,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = MockStore::new();
                for data in &embeddings {
                    store
                        .memory_insert(&memory_with_embedding("u1", data.clone()))
                        .await
                        .unwrap();
                }
                for data in &foreign {
                    store
                        .memory_insert(&memory_with_embedding("other", data.clone()))
                        .await
                        .unwrap();
                }

                let hits = store
                    .vector_search(&VectorSearchRequest {
                        user_id: UserId::new("u1"),
                        query: EmbeddingVector::new(vec![1.0, 0.0, 0.0, 0.0], "test".to_string()),
                        filter: RecallFilter::default(),
                        min_similarity,
                        limit,
                    })
                    .await
                    .unwrap();

                assert!(hits.len() <= limit);
                for window in hits.windows(2) {
                    assert!(window[0].similarity >= window[1].similarity);
                }
                for hit in &hits {
                    assert!(hit.similarity >= min_similarity);
                    assert_eq!(hit.memory.user_id, UserId::new("u1"));
                }
            });
        }
    }
}
