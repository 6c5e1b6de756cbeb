//! Store gateway
//!
//! Wraps a [`StoreBackend`] with the concurrency discipline the store
//! requires: the underlying store serializes write transactions, so the
//! gateway holds a single process-wide write mutex. Reads proceed in
//! parallel with each other and with the one in-flight writer.
//!
//! Transient serialization conflicts retry with bounded exponential backoff
//! and jitter; the retry loop polls the call deadline between attempts.

use crate::{
    ItemUpdate, MemoryUpdate, ServiceMetricRow, StoreBackend, ToolErrorRow, VectorSearchHit,
    VectorSearchRequest,
};
use engram_core::{
    AccessLogEntry, Deadline, EngramError, EngramResult, ItemId, Memory, MemoryId,
    MemoryRelationship, RecallFilter, RetryConfig, Session, SessionKey, StoreError, Timestamp,
    UserId, WorkingItem,
};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of a dedup-gated memory insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A fresh row was inserted.
    Inserted(MemoryId),
    /// A near-duplicate already existed; its last-access was touched and
    /// no row was inserted.
    Merged(MemoryId),
}

/// Number of dedup candidates examined per insert.
const DEDUP_CANDIDATES: usize = 3;

/// The store gateway shared by every worker.
pub struct StoreGateway {
    backend: Arc<dyn StoreBackend>,
    /// At most one write transaction is in flight at any time
    write_lock: Mutex<()>,
    retry: RetryConfig,
}

impl StoreGateway {
    pub fn new(backend: Arc<dyn StoreBackend>, retry: RetryConfig) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
            retry,
        }
    }

    /// Liveness probe for health reporting.
    pub async fn ping(&self) -> EngramResult<()> {
        self.backend.ping().await
    }

    // ========================================================================
    // RETRY LOOP
    // ========================================================================

    /// Run an operation, retrying serialization conflicts with exponential
    /// backoff (initial 50 ms, factor 2, cap 1 s, at most 5 attempts by
    /// default). Jitter spreads concurrent retries against the
    /// single-writer store. The deadline is polled between attempts.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        deadline: Deadline,
        f: F,
    ) -> EngramResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = EngramResult<T>>,
    {
        let mut backoff = self.retry.initial_backoff;

        for attempt in 1..=self.retry.max_attempts {
            if deadline.expired() {
                return Err(EngramError::timeout(operation));
            }

            match f().await {
                Ok(value) => return Ok(value),
                Err(EngramError::Store(StoreError::Conflict { reason })) => {
                    if attempt == self.retry.max_attempts {
                        return Err(EngramError::Store(StoreError::Transient {
                            attempts: attempt,
                            reason,
                        }));
                    }
                    tracing::debug!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retrying after store conflict"
                    );
                    let jitter = rand::rng().random_range(0.75..=1.25f32);
                    tokio::time::sleep(backoff.mul_f32(jitter).min(self.retry.max_backoff)).await;
                    backoff = backoff
                        .mul_f32(self.retry.backoff_multiplier)
                        .min(self.retry.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }

        // max_attempts >= 1 is enforced by config validation
        Err(EngramError::internal(format!(
            "Retry loop for '{}' exited without a result",
            operation
        )))
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    pub async fn session_get(
        &self,
        key: &SessionKey,
        deadline: Deadline,
    ) -> EngramResult<Option<Session>> {
        self.with_retry("session_get", deadline, || self.backend.session_get(key))
            .await
    }

    pub async fn session_put(&self, session: &Session, deadline: Deadline) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("session_put", deadline, || self.backend.session_put(session))
            .await
    }

    // ========================================================================
    // WORKING-MEMORY ITEMS
    // ========================================================================

    pub async fn item_insert(&self, item: &WorkingItem, deadline: Deadline) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("item_insert", deadline, || self.backend.item_insert(item))
            .await
    }

    pub async fn item_get(
        &self,
        id: ItemId,
        deadline: Deadline,
    ) -> EngramResult<Option<WorkingItem>> {
        self.with_retry("item_get", deadline, || self.backend.item_get(id))
            .await
    }

    pub async fn item_update(
        &self,
        id: ItemId,
        update: ItemUpdate,
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("item_update", deadline, || {
            self.backend.item_update(id, update.clone())
        })
        .await
    }

    pub async fn items_for_session(
        &self,
        key: &SessionKey,
        deadline: Deadline,
    ) -> EngramResult<Vec<WorkingItem>> {
        self.with_retry("items_for_session", deadline, || {
            self.backend.items_for_session(key)
        })
        .await
    }

    pub async fn items_delete(
        &self,
        key: &SessionKey,
        ids: &[ItemId],
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("items_delete", deadline, || {
            self.backend.items_delete(key, ids)
        })
        .await
    }

    pub async fn items_clear(&self, key: &SessionKey, deadline: Deadline) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("items_clear", deadline, || self.backend.items_clear(key))
            .await
    }

    // ========================================================================
    // LONG-TERM MEMORIES
    // ========================================================================

    /// Insert a memory unless a near-duplicate already exists.
    ///
    /// The dedup search runs inside the write-mutex scope so that two
    /// concurrent near-duplicate stores cannot both slip past the gate.
    /// Embedding and classification have already happened outside the lock.
    pub async fn memory_insert_deduped(
        &self,
        memory: &Memory,
        dedup_floor: f32,
        deadline: Deadline,
    ) -> EngramResult<InsertOutcome> {
        let _guard = self.write_lock.lock().await;

        let request = VectorSearchRequest {
            user_id: memory.user_id.clone(),
            query: memory.embedding.clone(),
            filter: RecallFilter::default(),
            min_similarity: dedup_floor,
            limit: DEDUP_CANDIDATES,
        };
        let hits = self
            .with_retry("dedup_search", deadline, || {
                self.backend.vector_search(&request)
            })
            .await?;

        if let Some(hit) = hits.first() {
            let existing = hit.memory.memory_id;
            let existing_ids = [existing];
            self.with_retry("dedup_touch", deadline, || {
                self.backend.memory_touch(&existing_ids, memory.created_at)
            })
            .await?;
            return Ok(InsertOutcome::Merged(existing));
        }

        self.with_retry("memory_insert", deadline, || {
            self.backend.memory_insert(memory)
        })
        .await?;
        Ok(InsertOutcome::Inserted(memory.memory_id))
    }

    pub async fn memory_get(
        &self,
        id: MemoryId,
        deadline: Deadline,
    ) -> EngramResult<Option<Memory>> {
        self.with_retry("memory_get", deadline, || self.backend.memory_get(id))
            .await
    }

    pub async fn memory_update(
        &self,
        id: MemoryId,
        update: MemoryUpdate,
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("memory_update", deadline, || {
            self.backend.memory_update(id, update.clone())
        })
        .await
    }

    pub async fn memory_touch(
        &self,
        ids: &[MemoryId],
        at: Timestamp,
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("memory_touch", deadline, || {
            self.backend.memory_touch(ids, at)
        })
        .await
    }

    pub async fn memory_set_deleted(
        &self,
        id: MemoryId,
        deleted_at: Option<Timestamp>,
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("memory_set_deleted", deadline, || {
            self.backend.memory_set_deleted(id, deleted_at)
        })
        .await
    }

    pub async fn memory_hard_delete(&self, id: MemoryId, deadline: Deadline) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("memory_hard_delete", deadline, || {
            self.backend.memory_hard_delete(id)
        })
        .await
    }

    pub async fn memories_for_user(
        &self,
        user: &UserId,
        include_deleted: bool,
        deadline: Deadline,
    ) -> EngramResult<Vec<Memory>> {
        self.with_retry("memories_for_user", deadline, || {
            self.backend.memories_for_user(user, include_deleted)
        })
        .await
    }

    pub async fn memory_delete_all_for_user(
        &self,
        user: &UserId,
        deadline: Deadline,
    ) -> EngramResult<u64> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("memory_delete_all_for_user", deadline, || {
            self.backend.memory_delete_all_for_user(user)
        })
        .await
    }

    pub async fn memory_set_importance(
        &self,
        updates: &[(MemoryId, f32)],
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("memory_set_importance", deadline, || {
            self.backend.memory_set_importance(updates)
        })
        .await
    }

    pub async fn vector_search(
        &self,
        request: &VectorSearchRequest,
        deadline: Deadline,
    ) -> EngramResult<Vec<VectorSearchHit>> {
        self.with_retry("vector_search", deadline, || {
            self.backend.vector_search(request)
        })
        .await
    }

    // ========================================================================
    // RELATIONSHIPS
    // ========================================================================

    pub async fn relationship_insert(
        &self,
        rel: &MemoryRelationship,
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("relationship_insert", deadline, || {
            self.backend.relationship_insert(rel)
        })
        .await
    }

    pub async fn relationships_for_memory(
        &self,
        id: MemoryId,
        deadline: Deadline,
    ) -> EngramResult<Vec<MemoryRelationship>> {
        self.with_retry("relationships_for_memory", deadline, || {
            self.backend.relationships_for_memory(id)
        })
        .await
    }

    // ========================================================================
    // APPEND-ONLY TABLES
    // ========================================================================

    pub async fn access_log_insert(
        &self,
        entries: &[AccessLogEntry],
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("access_log_insert", deadline, || {
            self.backend.access_log_insert(entries)
        })
        .await
    }

    pub async fn access_log_for_user(
        &self,
        user: &UserId,
        limit: usize,
        deadline: Deadline,
    ) -> EngramResult<Vec<AccessLogEntry>> {
        self.with_retry("access_log_for_user", deadline, || {
            self.backend.access_log_for_user(user, limit)
        })
        .await
    }

    pub async fn service_metrics_insert(
        &self,
        rows: &[ServiceMetricRow],
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("service_metrics_insert", deadline, || {
            self.backend.service_metrics_insert(rows)
        })
        .await
    }

    pub async fn tool_error_insert(
        &self,
        row: &ToolErrorRow,
        deadline: Deadline,
    ) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("tool_error_insert", deadline, || {
            self.backend.tool_error_insert(row)
        })
        .await
    }
}

impl std::fmt::Debug for StoreGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreGateway")
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockStore;
    use chrono::Utc;
    use engram_core::{EmbeddingVector, MemoryCategory, MemorySubtype, SourceType};

    fn test_memory(user: &str, content: &str, embedding: Vec<f32>) -> Memory {
        let now = Utc::now();
        Memory {
            memory_id: MemoryId::now_v7(),
            user_id: UserId::new(user),
            category: MemoryCategory::Semantic,
            subtype: MemorySubtype::Project,
            content: content.to_string(),
            summary: None,
            embedding: EmbeddingVector::new(embedding, "test".to_string()),
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

    #[tokio::test]
    async fn test_dedup_merges_identical_content() {
        let gateway = StoreGateway::new(Arc::new(MockStore::new()), RetryConfig::default());

        let first = test_memory("u1", "Project uses PostgreSQL 15", vec![1.0, 0.0, 0.0]);
        let outcome = gateway
            .memory_insert_deduped(&first, 0.95, Deadline::none())
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted(first.memory_id));

        let second = test_memory("u1", "Project uses PostgreSQL 15", vec![1.0, 0.0, 0.0]);
        let outcome = gateway
            .memory_insert_deduped(&second, 0.95, Deadline::none())
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Merged(first.memory_id));

        // Exactly one row exists and its access was touched
        let rows = gateway
            .memories_for_user(&UserId::new("u1"), false, Deadline::none())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].access_count, 1);
    }

    #[tokio::test]
    async fn test_dedup_does_not_merge_across_users() {
        let gateway = StoreGateway::new(Arc::new(MockStore::new()), RetryConfig::default());

        let first = test_memory("u1", "same", vec![0.0, 1.0]);
        gateway
            .memory_insert_deduped(&first, 0.95, Deadline::none())
            .await
            .unwrap();

        let second = test_memory("u2", "same", vec![0.0, 1.0]);
        let outcome = gateway
            .memory_insert_deduped(&second, 0.95, Deadline::none())
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted(second.memory_id));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_conflicts() {
        let store = Arc::new(MockStore::new());
        let retry = RetryConfig {
            initial_backoff: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let gateway = StoreGateway::new(store.clone(), retry);

        // Fail the first two attempts with a serialization conflict
        store.fail_next_writes(2);

        let memory = test_memory("u1", "conflicted", vec![1.0]);
        gateway
            .memory_insert_deduped(&memory, 0.95, Deadline::none())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_reports_transient() {
        let store = Arc::new(MockStore::new());
        let retry = RetryConfig {
            max_attempts: 3,
            initial_backoff: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let gateway = StoreGateway::new(store.clone(), retry);

        store.fail_next_writes(100);

        let memory = test_memory("u1", "always conflicted", vec![1.0]);
        let err = gateway
            .memory_insert_deduped(&memory, 0.95, Deadline::none())
            .await
            .unwrap_err();
        match err {
            EngramError::Store(StoreError::Transient { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("expected transient error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_deadline_short_circuits() {
        let gateway = StoreGateway::new(Arc::new(MockStore::new()), RetryConfig::default());
        let expired = Deadline::at(std::time::Instant::now() - std::time::Duration::from_secs(1));

        let err = gateway
            .session_get(&SessionKey::new("s"), expired)
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_dedup_inserts_converge() {
        let gateway = Arc::new(StoreGateway::new(
            Arc::new(MockStore::new()),
            RetryConfig::default(),
        ));

        // Eight concurrent stores of identical content serialize behind the
        // write mutex, so exactly one row survives the dedup gate.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gateway = Arc::clone(&gateway);
            handles.push(tokio::spawn(async move {
                let memory = test_memory("u1", "identical", vec![1.0, 0.0]);
                gateway
                    .memory_insert_deduped(&memory, 0.95, Deadline::none())
                    .await
                    .unwrap()
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if let InsertOutcome::Inserted(_) = handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);

        let rows = gateway
            .memories_for_user(&UserId::new("u1"), false, Deadline::none())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
