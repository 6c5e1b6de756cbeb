//! Working-memory manager
//!
//! Session lifecycle, item append with token accounting, eviction with
//! checkpoint promotion into long-term memory, and budgeted reads.
//!
//! Appends against the same session are totally ordered by a per-session
//! mutex; sequence numbers are assigned under it. Across sessions there is
//! no ordering.

use crate::longterm::{LongTermMemoryManager, StoreMemoryRequest};
use crate::security::SecurityValidator;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use engram_core::{
    estimate_tokens, ContentType, Deadline, EngramConfig, EngramError, EngramResult, ItemId,
    MemoryId, Session, SessionKey, SourceType, Timestamp, UserId, ValidationError, WorkingItem,
};
use engram_llm::ModelGateway;
use engram_storage::{ItemUpdate, StoreGateway};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Options for initialize-or-resume-session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub org_id: Option<String>,
    /// Token capacity; the configured default applies when absent
    pub max_tokens: Option<i32>,
    /// Session expiry, seconds from now
    pub ttl_seconds: Option<i64>,
    pub config: Option<serde_json::Value>,
}

/// Request to append one working-memory item.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub content: String,
    pub content_type: ContentType,
    /// Relevance score in [0, 1]
    pub relevance: f32,
    pub pinned: bool,
}

/// Outcome of an append, including any eviction it triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendOutcome {
    pub item: WorkingItem,
    /// Items evicted to make room
    pub evicted: Vec<ItemId>,
    /// Long-term memories created by eviction promotion
    pub promoted: Vec<MemoryId>,
}

/// Outcome of clearing a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearOutcome {
    pub items_removed: usize,
    pub promoted: Vec<MemoryId>,
}

// ============================================================================
// MANAGER
// ============================================================================

/// The working-memory manager shared by every worker.
pub struct WorkingMemoryManager {
    store: Arc<StoreGateway>,
    longterm: Arc<LongTermMemoryManager>,
    model: Arc<ModelGateway>,
    validator: SecurityValidator,
    config: Arc<EngramConfig>,
    /// Per-session append mutexes; entries live for the process lifetime
    session_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkingMemoryManager {
    pub fn new(
        store: Arc<StoreGateway>,
        longterm: Arc<LongTermMemoryManager>,
        model: Arc<ModelGateway>,
        config: Arc<EngramConfig>,
    ) -> Self {
        Self {
            store,
            longterm,
            model,
            validator: SecurityValidator::new(),
            config,
            session_locks: DashMap::new(),
        }
    }

    fn session_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(key.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ========================================================================
    // SESSION LIFECYCLE
    // ========================================================================

    /// Initialize a session or resume an existing one. An expired session
    /// is treated as absent: its items are cleared and a fresh session is
    /// created under the same key.
    pub async fn init_session(
        &self,
        key: &SessionKey,
        user: &UserId,
        options: SessionOptions,
        deadline: Deadline,
    ) -> EngramResult<Session> {
        key.validate()?;
        user.validate()?;

        let lock = self.session_lock(key);
        let _guard = lock.lock().await;

        let now = Utc::now();
        if let Some(mut session) = self.store.session_get(key, deadline).await? {
            if !session.is_expired(now) {
                session.last_active_at = now;
                self.store.session_put(&session, deadline).await?;
                return Ok(session);
            }
            tracing::debug!(session = %key, "Session expired; reinitializing");
            self.store.items_clear(key, deadline).await?;
        }

        let session = Session {
            session_key: key.clone(),
            user_id: user.clone(),
            org_id: options.org_id,
            max_tokens: options
                .max_tokens
                .unwrap_or(self.config.working_memory_capacity),
            current_tokens: 0,
            created_at: now,
            last_active_at: now,
            expires_at: options
                .ttl_seconds
                .map(|seconds| now + Duration::seconds(seconds)),
            config: options.config,
        };
        self.store.session_put(&session, deadline).await?;
        Ok(session)
    }

    // ========================================================================
    // APPEND
    // ========================================================================

    /// Append an item. Non-system content is security-checked. If the new
    /// total would exceed session capacity, eviction runs before the insert
    /// returns: unpinned items are removed lowest-priority first until the
    /// freed space covers the new item, promoting evictees that cross the
    /// relevance threshold (or hold task state) into long-term memory.
    pub async fn append(
        &self,
        key: &SessionKey,
        user: &UserId,
        request: AppendRequest,
        deadline: Deadline,
    ) -> EngramResult<AppendOutcome> {
        key.validate()?;
        user.validate()?;
        if request.content_type != ContentType::System {
            self.validator.check(&request.content)?;
        }
        if !(0.0..=1.0).contains(&request.relevance) {
            return Err(EngramError::Validation(ValidationError::InvalidValue {
                field: "relevance".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            }));
        }

        let token_count = estimate_tokens(&request.content);

        let lock = self.session_lock(key);
        let _guard = lock.lock().await;

        // Auto-create the session; a missing session is recovered locally,
        // never surfaced to the caller.
        let mut session = match self.store.session_get(key, deadline).await? {
            Some(session) if !session.is_expired(Utc::now()) => session,
            Some(_) => {
                self.store.items_clear(key, deadline).await?;
                self.fresh_session(key, user)
            }
            None => self.fresh_session(key, user),
        };

        if token_count > session.max_tokens {
            return Err(EngramError::Validation(ValidationError::InvalidValue {
                field: "content".to_string(),
                reason: format!(
                    "item of {} tokens can never fit capacity {}",
                    token_count, session.max_tokens
                ),
            }));
        }

        let now = Utc::now();
        let items = self.store.items_for_session(key, deadline).await?;
        let next_sequence = items.iter().map(|item| item.sequence).max().unwrap_or(0) + 1;

        let mut evicted = Vec::new();
        let mut promoted = Vec::new();

        if session.current_tokens + token_count > session.max_tokens {
            let (evicted_items, freed) =
                self.select_evictions(&items, token_count, now);

            if session.current_tokens + token_count - freed > session.max_tokens {
                // Everything left is pinned; the append cannot satisfy the
                // capacity invariant.
                return Err(EngramError::Validation(ValidationError::InvalidValue {
                    field: "content".to_string(),
                    reason: "session capacity exhausted by pinned items".to_string(),
                }));
            }

            promoted = self
                .promote_items(
                    &session,
                    &evicted_items,
                    |item| {
                        item.relevance >= self.config.promotion_threshold
                            || item.content_type == ContentType::TaskState
                    },
                    SourceType::Promoted,
                    deadline,
                )
                .await;

            let ids: Vec<ItemId> = evicted_items.iter().map(|item| item.item_id).collect();
            self.store.items_delete(key, &ids, deadline).await?;
            session.current_tokens -= freed;
            evicted = ids;
        }

        let item = WorkingItem {
            item_id: ItemId::now_v7(),
            session_key: key.clone(),
            content_type: request.content_type,
            content: request.content,
            token_count,
            relevance: request.relevance,
            pinned: request.pinned,
            sequence: next_sequence,
            created_at: now,
            last_accessed_at: now,
        };
        self.store.item_insert(&item, deadline).await?;

        session.current_tokens += token_count;
        session.last_active_at = now;
        self.store.session_put(&session, deadline).await?;

        Ok(AppendOutcome {
            item,
            evicted,
            promoted,
        })
    }

    fn fresh_session(&self, key: &SessionKey, user: &UserId) -> Session {
        let now = Utc::now();
        Session {
            session_key: key.clone(),
            user_id: user.clone(),
            org_id: None,
            max_tokens: self.config.working_memory_capacity,
            current_tokens: 0,
            created_at: now,
            last_active_at: now,
            expires_at: None,
            config: None,
        }
    }

    /// Pick unpinned items to evict, lowest priority first, until the
    /// freed space covers the incoming item (or candidates run out).
    fn select_evictions(
        &self,
        items: &[WorkingItem],
        needed_tokens: i32,
        now: Timestamp,
    ) -> (Vec<WorkingItem>, i32) {
        let mut candidates: Vec<&WorkingItem> =
            items.iter().filter(|item| !item.pinned).collect();
        candidates.sort_by(|a, b| {
            eviction_priority(a, now)
                .partial_cmp(&eviction_priority(b, now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut evicted = Vec::new();
        let mut freed = 0;
        for item in candidates {
            if freed >= needed_tokens {
                break;
            }
            freed += item.token_count;
            evicted.push(item.clone());
        }
        (evicted, freed)
    }

    /// Promote matching items into long-term memory with their relevance as
    /// importance, tagged with the source session. A failed promotion is
    /// logged and skipped; it never fails the surrounding operation.
    async fn promote_items<F>(
        &self,
        session: &Session,
        items: &[WorkingItem],
        matches: F,
        source_type: SourceType,
        deadline: Deadline,
    ) -> Vec<MemoryId>
    where
        F: Fn(&WorkingItem) -> bool,
    {
        let to_promote: Vec<&WorkingItem> =
            items.iter().filter(|item| matches(item)).collect();
        if to_promote.is_empty() {
            return Vec::new();
        }

        // Warm the embedding cache in one batch; per-item stores below
        // then hit it instead of a model round-trip each.
        if to_promote.len() > 1 {
            let contents: Vec<String> =
                to_promote.iter().map(|item| item.content.clone()).collect();
            if let Err(e) = self.model.embed_batch(&contents).await {
                tracing::debug!(error = %e, "Batch embed for promotion failed; falling back to per-item");
            }
        }

        let mut promoted = Vec::new();
        for item in to_promote {
            let request = StoreMemoryRequest {
                content: item.content.clone(),
                importance: Some(item.relevance),
                source_session: Some(session.session_key.clone()),
                source_type,
                ..Default::default()
            };
            match self
                .longterm
                .store(&session.user_id, request, deadline)
                .await
            {
                Ok(outcome) => promoted.push(outcome.memory_id),
                Err(e) => {
                    tracing::warn!(
                        item = %item.item_id,
                        error = %e,
                        "Promotion to long-term memory failed; item dropped"
                    );
                }
            }
        }
        promoted
    }

    // ========================================================================
    // READ / UPDATE
    // ========================================================================

    /// Items ordered by (pinned desc, relevance desc, sequence desc),
    /// greedy-filled up to the token budget. Items that do not fit are
    /// skipped, not truncated; they persist unreturned.
    pub async fn get_items(
        &self,
        key: &SessionKey,
        token_budget: Option<i32>,
        deadline: Deadline,
    ) -> EngramResult<Vec<WorkingItem>> {
        let mut items = self.store.items_for_session(key, deadline).await?;
        items.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| {
                    b.relevance
                        .partial_cmp(&a.relevance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.sequence.cmp(&a.sequence))
        });

        match token_budget {
            None => Ok(items),
            Some(budget) => {
                let mut used = 0;
                let mut selected = Vec::new();
                for item in items {
                    if used + item.token_count <= budget {
                        used += item.token_count;
                        selected.push(item);
                    }
                }
                Ok(selected)
            }
        }
    }

    /// Update an item's pinned flag and/or relevance score.
    pub async fn update_item(
        &self,
        key: &SessionKey,
        item_id: ItemId,
        pinned: Option<bool>,
        relevance: Option<f32>,
        deadline: Deadline,
    ) -> EngramResult<WorkingItem> {
        if let Some(relevance) = relevance {
            if !(0.0..=1.0).contains(&relevance) {
                return Err(EngramError::Validation(ValidationError::InvalidValue {
                    field: "relevance".to_string(),
                    reason: "must be between 0.0 and 1.0".to_string(),
                }));
            }
        }

        let item = self
            .store
            .item_get(item_id, deadline)
            .await?
            .filter(|item| &item.session_key == key)
            .ok_or_else(|| {
                EngramError::Store(engram_core::StoreError::NotFound {
                    entity_type: engram_core::EntityType::WorkingItem,
                    id: item_id.to_string(),
                })
            })?;

        self.store
            .item_update(
                item.item_id,
                ItemUpdate {
                    pinned,
                    relevance,
                    last_accessed_at: Some(Utc::now()),
                },
                deadline,
            )
            .await?;

        self.store
            .item_get(item_id, deadline)
            .await?
            .ok_or_else(|| {
                EngramError::Store(engram_core::StoreError::NotFound {
                    entity_type: engram_core::EntityType::WorkingItem,
                    id: item_id.to_string(),
                })
            })
    }

    // ========================================================================
    // CLEAR / CHECKPOINT
    // ========================================================================

    /// Clear a session. With checkpoint-first (the default), items with
    /// relevance at or above the checkpoint floor, and pinned items, are
    /// promoted to long-term memory before deletion.
    pub async fn clear_session(
        &self,
        key: &SessionKey,
        checkpoint_first: bool,
        deadline: Deadline,
    ) -> EngramResult<ClearOutcome> {
        let lock = self.session_lock(key);
        let _guard = lock.lock().await;

        let Some(mut session) = self.store.session_get(key, deadline).await? else {
            return Ok(ClearOutcome {
                items_removed: 0,
                promoted: Vec::new(),
            });
        };

        let items = self.store.items_for_session(key, deadline).await?;
        let promoted = if checkpoint_first {
            self.promote_items(
                &session,
                &items,
                |item| item.relevance >= self.config.checkpoint_relevance_floor || item.pinned,
                SourceType::Checkpoint,
                deadline,
            )
            .await
        } else {
            Vec::new()
        };

        self.store.items_clear(key, deadline).await?;
        session.current_tokens = 0;
        session.last_active_at = Utc::now();
        self.store.session_put(&session, deadline).await?;

        Ok(ClearOutcome {
            items_removed: items.len(),
            promoted,
        })
    }

    /// Checkpoint: the clear-session promotion pass without the deletion.
    /// Dedup in the long-term store keeps repeated checkpoints from
    /// accumulating copies.
    pub async fn checkpoint(
        &self,
        key: &SessionKey,
        deadline: Deadline,
    ) -> EngramResult<Vec<MemoryId>> {
        let Some(session) = self.store.session_get(key, deadline).await? else {
            return Ok(Vec::new());
        };

        let items = self.store.items_for_session(key, deadline).await?;
        Ok(self
            .promote_items(
                &session,
                &items,
                |item| item.relevance >= self.config.checkpoint_relevance_floor || item.pinned,
                SourceType::Checkpoint,
                deadline,
            )
            .await)
    }

    /// Current session state, if the session exists and has not expired.
    pub async fn session(
        &self,
        key: &SessionKey,
        deadline: Deadline,
    ) -> EngramResult<Option<Session>> {
        Ok(self
            .store
            .session_get(key, deadline)
            .await?
            .filter(|session| !session.is_expired(Utc::now())))
    }
}

/// Eviction priority: higher survives longer.
/// `p = 100·relevance + 10/(1 + age_seconds/3600) + (10 if task-state)`
fn eviction_priority(item: &WorkingItem, now: Timestamp) -> f32 {
    let age_seconds = (now - item.created_at).num_seconds().max(0) as f32;
    let type_bonus = if item.content_type == ContentType::TaskState {
        10.0
    } else {
        0.0
    };
    100.0 * item.relevance + 10.0 / (1.0 + age_seconds / 3600.0) + type_bonus
}

impl std::fmt::Debug for WorkingMemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingMemoryManager")
            .field("tracked_sessions", &self.session_locks.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
