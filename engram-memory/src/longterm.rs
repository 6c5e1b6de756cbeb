//! Long-term memory manager
//!
//! Store/update/forget, auto-classification, dedup, supersession, vector
//! recall with composite scoring, contradiction detection, decay, and the
//! quality report. Embedding and classification always run outside the
//! store's write-mutex scope; only the dedup check shares it (inside the
//! gateway) so near-duplicates cannot race past the similarity gate.

use crate::scoring::{age_days, composite_relevance, jaccard_similarity, rank_recalled, RecalledMemory};
use crate::security::SecurityValidator;
use chrono::{Duration, Utc};
use engram_core::{
    AccessId, AccessLogEntry, Deadline, EngramConfig, EngramError, EngramResult, EntityType,
    Memory, MemoryCategory, MemoryId, MemoryRelationship, MemorySubtype, RecallFilter,
    RelationshipId, RelationshipKind, SessionKey, SourceType, StoreError, Timestamp, UserId,
    ValidationError, is_valid_pair,
};
use engram_llm::ModelGateway;
use engram_storage::{
    InsertOutcome, MemoryUpdate, StoreGateway, VectorSearchHit, VectorSearchRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Literal confirmation token required by forget-all.
pub const CONFIRM_DELETE_ALL: &str = "CONFIRM_DELETE_ALL";

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Request to store one long-term memory.
#[derive(Debug, Clone, Default)]
pub struct StoreMemoryRequest {
    pub content: String,
    /// Category hint; classification runs when the pair is incomplete
    pub category: Option<MemoryCategory>,
    pub subtype: Option<MemorySubtype>,
    pub importance: Option<f32>,
    pub entities: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub event_at: Option<Timestamp>,
    pub is_temporal: Option<bool>,
    pub summary: Option<String>,
    pub confidence: Option<f32>,
    pub source_session: Option<SessionKey>,
    pub source_type: SourceType,
}

/// What the store operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreAction {
    Stored,
    MergedWithExisting,
}

/// Outcome of a store operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOutcome {
    pub memory_id: MemoryId,
    pub action: StoreAction,
}

/// Request to update an existing memory.
#[derive(Debug, Clone, Default)]
pub struct UpdateMemoryRequest {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub importance: Option<f32>,
    pub confidence: Option<f32>,
    /// Shallow-merged into the existing metadata object
    pub metadata: Option<serde_json::Value>,
    pub entities: Option<Vec<String>>,
    pub event_at: Option<Timestamp>,
    pub is_temporal: Option<bool>,
}

/// One contradiction candidate: the newer memory should supersede the older.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionCandidate {
    pub older_id: MemoryId,
    pub newer_id: MemoryId,
    pub similarity: f32,
    pub jaccard: f32,
}

/// Outcome of an apply-decay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayOutcome {
    pub examined: usize,
    pub decayed: usize,
}

/// Per-user memory quality report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_live: usize,
    pub total_soft_deleted: usize,
    /// Rows recording a supersession
    pub superseding: usize,
    pub by_category: HashMap<String, usize>,
    pub never_accessed: usize,
    pub low_confidence: usize,
    pub avg_importance: f32,
    /// Rows whose embedding does not match the configured dimension
    pub dimension_violations: usize,
}

// ============================================================================
// MANAGER
// ============================================================================

/// The long-term memory manager shared by every worker.
pub struct LongTermMemoryManager {
    store: Arc<StoreGateway>,
    model: Arc<ModelGateway>,
    validator: SecurityValidator,
    config: Arc<EngramConfig>,
}

impl LongTermMemoryManager {
    pub fn new(
        store: Arc<StoreGateway>,
        model: Arc<ModelGateway>,
        config: Arc<EngramConfig>,
    ) -> Self {
        Self {
            store,
            model,
            validator: SecurityValidator::new(),
            config,
        }
    }

    // ========================================================================
    // STORE
    // ========================================================================

    /// Store a memory for a user. Content is security-checked first; the
    /// taxonomy pair comes from hints or classification; a near-duplicate
    /// (cosine >= the dedup floor) merges into the existing row instead of
    /// inserting.
    pub async fn store(
        &self,
        user: &UserId,
        request: StoreMemoryRequest,
        deadline: Deadline,
    ) -> EngramResult<StoreOutcome> {
        user.validate()?;
        self.validator.check(&request.content)?;

        if request.content.trim().is_empty() {
            return Err(EngramError::Validation(ValidationError::RequiredFieldMissing {
                field: "content".to_string(),
            }));
        }

        // Classification and embedding run outside the write-mutex scope.
        let (category, subtype, classified) = match (request.category, request.subtype) {
            (Some(category), Some(subtype)) => (category, subtype, None),
            _ => {
                let classification = self.model.classify(&request.content, None).await;
                (
                    request.category.unwrap_or(classification.category),
                    request.subtype.unwrap_or(classification.subtype),
                    Some(classification),
                )
            }
        };

        if !is_valid_pair(category, subtype) {
            return Err(EngramError::Validation(ValidationError::InvalidCategoryPair {
                category,
                subtype,
            }));
        }

        let entities = match request.entities {
            Some(entities) => entities,
            None => match &classified {
                Some(classification) if !classification.entities.is_empty() => {
                    classification.entities.clone()
                }
                _ => self.model.extract_entities(&request.content).await,
            },
        };

        let importance = request
            .importance
            .or_else(|| classified.as_ref().map(|c| c.importance))
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let is_temporal = request
            .is_temporal
            .or_else(|| classified.as_ref().map(|c| c.is_temporal))
            .unwrap_or(false);
        let summary = request
            .summary
            .or_else(|| classified.as_ref().and_then(|c| c.summary.clone()));

        let embedding = self.model.embed(&request.content).await?;
        embedding.ensure_dimensions(self.config.dimension)?;

        let now = Utc::now();
        let memory = Memory {
            memory_id: MemoryId::now_v7(),
            user_id: user.clone(),
            category,
            subtype,
            content: request.content,
            summary,
            embedding,
            entities,
            metadata: request.metadata,
            event_at: request.event_at,
            is_temporal,
            importance,
            access_count: 0,
            decay_factor: 1.0,
            supersedes: None,
            source_session: request.source_session,
            source_type: request.source_type,
            confidence: request.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
            created_at: now,
            last_accessed_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let outcome = self
            .store
            .memory_insert_deduped(&memory, self.config.dedup_similarity_floor, deadline)
            .await?;

        Ok(match outcome {
            InsertOutcome::Inserted(memory_id) => {
                tracing::debug!(%memory_id, category = %category, subtype = %subtype, "Stored memory");
                StoreOutcome {
                    memory_id,
                    action: StoreAction::Stored,
                }
            }
            InsertOutcome::Merged(memory_id) => {
                tracing::debug!(%memory_id, "Merged near-duplicate store into existing memory");
                StoreOutcome {
                    memory_id,
                    action: StoreAction::MergedWithExisting,
                }
            }
        })
    }

    // ========================================================================
    // RECALL
    // ========================================================================

    /// Recall memories for a query, ranked by composite relevance. Bumps
    /// access counts in one batched write and appends access-log entries
    /// best-effort.
    pub async fn recall(
        &self,
        user: &UserId,
        query: &str,
        filter: RecallFilter,
        limit: usize,
        min_similarity: Option<f32>,
        session_key: Option<SessionKey>,
        deadline: Deadline,
    ) -> EngramResult<Vec<RecalledMemory>> {
        user.validate()?;
        let query_embedding = self.model.embed(query).await?;

        let hits = self
            .store
            .vector_search(
                &VectorSearchRequest {
                    user_id: user.clone(),
                    query: query_embedding,
                    filter,
                    min_similarity: min_similarity
                        .unwrap_or(self.config.recall_similarity_floor),
                    limit,
                },
                deadline,
            )
            .await?;

        let now = Utc::now();
        let mut results: Vec<RecalledMemory> = hits
            .into_iter()
            .map(|hit| {
                let relevance = composite_relevance(
                    &self.config.relevance_weights,
                    self.config.recency_half_life_days,
                    self.config.access_count_cap,
                    hit.similarity,
                    age_days(hit.memory.created_at, now),
                    hit.memory.access_count,
                    hit.memory.importance,
                );
                RecalledMemory {
                    memory: hit.memory,
                    similarity: hit.similarity,
                    relevance,
                }
            })
            .collect();
        rank_recalled(&mut results);

        let accessed: Vec<(MemoryId, f32)> = results
            .iter()
            .map(|r| (r.memory.memory_id, r.similarity))
            .collect();
        self.record_access(user, session_key, query, &accessed, deadline)
            .await?;

        Ok(results)
    }

    /// Slot retrieval for the context assembler: candidates only, with no
    /// access bump and no log entry. The assembler records access for the
    /// items it actually returns.
    pub async fn retrieve_candidates(
        &self,
        user: &UserId,
        query_embedding: &engram_core::EmbeddingVector,
        filter: RecallFilter,
        limit: usize,
        deadline: Deadline,
    ) -> EngramResult<Vec<VectorSearchHit>> {
        self.store
            .vector_search(
                &VectorSearchRequest {
                    user_id: user.clone(),
                    query: query_embedding.clone(),
                    filter,
                    min_similarity: self.config.recall_similarity_floor,
                    limit,
                },
                deadline,
            )
            .await
    }

    /// Bump access counts (one batched write) and append access-log
    /// entries. The log write is best-effort: counts and log may drift.
    pub async fn record_access(
        &self,
        user: &UserId,
        session_key: Option<SessionKey>,
        query: &str,
        accessed: &[(MemoryId, f32)],
        deadline: Deadline,
    ) -> EngramResult<()> {
        if accessed.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let ids: Vec<MemoryId> = accessed.iter().map(|(id, _)| *id).collect();
        self.store.memory_touch(&ids, now, deadline).await?;

        let entries: Vec<AccessLogEntry> = accessed
            .iter()
            .map(|(memory_id, similarity)| AccessLogEntry {
                access_id: AccessId::now_v7(),
                memory_id: *memory_id,
                session_key: session_key.clone(),
                user_id: user.clone(),
                query: query.to_string(),
                similarity: *similarity,
                was_useful: None,
                was_used: None,
                accessed_at: now,
            })
            .collect();
        if let Err(e) = self.store.access_log_insert(&entries, deadline).await {
            tracing::warn!(error = %e, "Access-log append failed; continuing");
        }
        Ok(())
    }

    // ========================================================================
    // UPDATE
    // ========================================================================

    /// Update a memory. Content changes re-run the security check and
    /// re-embed; metadata merges shallowly into the existing object.
    pub async fn update(
        &self,
        user: &UserId,
        memory_id: MemoryId,
        request: UpdateMemoryRequest,
        deadline: Deadline,
    ) -> EngramResult<Memory> {
        let memory = self.get_owned(user, memory_id, deadline).await?;

        let mut update = MemoryUpdate {
            summary: request.summary,
            importance: request.importance.map(|i| i.clamp(0.0, 1.0)),
            confidence: request.confidence.map(|c| c.clamp(0.0, 1.0)),
            entities: request.entities,
            event_at: request.event_at,
            is_temporal: request.is_temporal,
            updated_at: Some(Utc::now()),
            ..Default::default()
        };

        if let Some(content) = request.content {
            if content != memory.content {
                self.validator.check(&content)?;
                let embedding = self.model.embed(&content).await?;
                embedding.ensure_dimensions(self.config.dimension)?;
                update.embedding = Some(embedding);
                update.content = Some(content);
            }
        }

        if let Some(new_metadata) = request.metadata {
            update.metadata = Some(merge_metadata(memory.metadata.clone(), new_metadata));
        }

        self.store.memory_update(memory_id, update, deadline).await?;
        self.store
            .memory_get(memory_id, deadline)
            .await?
            .ok_or_else(|| not_found(memory_id))
    }

    // ========================================================================
    // FORGET
    // ========================================================================

    /// Forget a memory. Soft delete sets the delete timestamp; hard delete
    /// removes the row and prunes its relationships.
    pub async fn forget(
        &self,
        user: &UserId,
        memory_id: MemoryId,
        hard: bool,
        deadline: Deadline,
    ) -> EngramResult<()> {
        self.get_owned(user, memory_id, deadline).await?;
        if hard {
            self.store.memory_hard_delete(memory_id, deadline).await
        } else {
            self.store
                .memory_set_deleted(memory_id, Some(Utc::now()), deadline)
                .await
        }
    }

    /// Administrative restoration of a soft-deleted memory.
    pub async fn restore(
        &self,
        user: &UserId,
        memory_id: MemoryId,
        deadline: Deadline,
    ) -> EngramResult<()> {
        // Owner check must see the soft-deleted row
        let memory = self
            .store
            .memory_get(memory_id, deadline)
            .await?
            .filter(|m| &m.user_id == user)
            .ok_or_else(|| not_found(memory_id))?;
        if memory.deleted_at.is_none() {
            return Ok(());
        }
        self.store.memory_set_deleted(memory_id, None, deadline).await
    }

    /// GDPR erasure. Requires the literal confirmation token and
    /// hard-deletes every row the user owns across all tables.
    pub async fn forget_all(
        &self,
        user: &UserId,
        confirmation: &str,
        deadline: Deadline,
    ) -> EngramResult<u64> {
        if confirmation != CONFIRM_DELETE_ALL {
            return Err(EngramError::Validation(ValidationError::ConfirmationRequired {
                expected: CONFIRM_DELETE_ALL,
            }));
        }
        let removed = self.store.memory_delete_all_for_user(user, deadline).await?;
        tracing::info!(user = %user, removed, "Erased all memories for user");
        Ok(removed)
    }

    // ========================================================================
    // SUPERSEDE
    // ========================================================================

    /// Mark `new_id` as replacing `old_id`: the new memory records the
    /// supersession, the old one is soft-deleted, and an `updates` edge
    /// links them. Both must belong to the same user.
    pub async fn supersede(
        &self,
        user: &UserId,
        old_id: MemoryId,
        new_id: MemoryId,
        deadline: Deadline,
    ) -> EngramResult<()> {
        if old_id == new_id {
            return Err(EngramError::Validation(ValidationError::InvalidValue {
                field: "new_memory_id".to_string(),
                reason: "a memory cannot supersede itself".to_string(),
            }));
        }

        let old = self.get_owned(user, old_id, deadline).await?;
        self.get_owned(user, new_id, deadline).await?;

        let now = Utc::now();
        self.store
            .memory_update(
                new_id,
                MemoryUpdate {
                    supersedes: Some(old_id),
                    updated_at: Some(now),
                    ..Default::default()
                },
                deadline,
            )
            .await?;
        self.store
            .memory_set_deleted(old_id, Some(now), deadline)
            .await?;
        self.store
            .relationship_insert(
                &MemoryRelationship {
                    relationship_id: RelationshipId::now_v7(),
                    source_id: old_id,
                    target_id: new_id,
                    kind: RelationshipKind::Updates,
                    strength: 1.0,
                    context: Some(format!("superseded {}", old.created_at.to_rfc3339())),
                    created_at: now,
                    created_by: "supersede".to_string(),
                },
                deadline,
            )
            .await?;
        Ok(())
    }

    // ========================================================================
    // CONTRADICTIONS
    // ========================================================================

    /// Offline contradiction sweep: same-user pairs that embed nearly
    /// identically (cosine >= the contradiction floor) but share little
    /// vocabulary (Jaccard < 0.5). The newer memory is the candidate to
    /// supersede the older.
    pub async fn find_contradictions(
        &self,
        user: &UserId,
        deadline: Deadline,
    ) -> EngramResult<Vec<ContradictionCandidate>> {
        let memories = self.store.memories_for_user(user, false, deadline).await?;
        let mut candidates = Vec::new();

        for i in 0..memories.len() {
            for j in (i + 1)..memories.len() {
                let a = &memories[i];
                let b = &memories[j];
                let similarity = a.embedding.cosine_similarity(&b.embedding)?;
                if similarity < self.config.contradiction_similarity_floor {
                    continue;
                }
                let jaccard = jaccard_similarity(&a.content, &b.content);
                if jaccard >= 0.5 {
                    continue;
                }
                let (older, newer) = if a.created_at <= b.created_at {
                    (a, b)
                } else {
                    (b, a)
                };
                candidates.push(ContradictionCandidate {
                    older_id: older.memory_id,
                    newer_id: newer.memory_id,
                    similarity,
                    jaccard,
                });
            }
        }

        Ok(candidates)
    }

    // ========================================================================
    // DECAY
    // ========================================================================

    /// Multiply importance of idle memories by the decay rate, floored.
    /// Only ever runs through this explicit call, never during recall.
    pub async fn apply_decay(
        &self,
        user: &UserId,
        rate: Option<f32>,
        inactive_days: Option<i64>,
        deadline: Deadline,
    ) -> EngramResult<DecayOutcome> {
        let rate = rate.unwrap_or(self.config.decay.rate);
        if !(0.0 < rate && rate <= 1.0) {
            return Err(EngramError::Validation(ValidationError::InvalidValue {
                field: "rate".to_string(),
                reason: "must be in (0.0, 1.0]".to_string(),
            }));
        }
        let inactive_days = inactive_days.unwrap_or(self.config.decay.inactive_days);
        let floor = self.config.decay.floor;
        let cutoff = Utc::now() - Duration::days(inactive_days);

        let memories = self.store.memories_for_user(user, false, deadline).await?;
        let examined = memories.len();

        let updates: Vec<(MemoryId, f32)> = memories
            .into_iter()
            .filter(|m| m.last_accessed_at < cutoff)
            .filter_map(|m| {
                let decayed = (m.importance * rate).max(floor);
                if (decayed - m.importance).abs() > f32::EPSILON {
                    Some((m.memory_id, decayed))
                } else {
                    None
                }
            })
            .collect();

        let decayed = updates.len();
        if !updates.is_empty() {
            self.store.memory_set_importance(&updates, deadline).await?;
        }

        Ok(DecayOutcome { examined, decayed })
    }

    // ========================================================================
    // QUALITY REPORT
    // ========================================================================

    /// Aggregate quality metrics over one user's memories.
    pub async fn quality_report(
        &self,
        user: &UserId,
        deadline: Deadline,
    ) -> EngramResult<QualityReport> {
        let memories = self.store.memories_for_user(user, true, deadline).await?;

        let mut report = QualityReport {
            total_live: 0,
            total_soft_deleted: 0,
            superseding: 0,
            by_category: HashMap::new(),
            never_accessed: 0,
            low_confidence: 0,
            avg_importance: 0.0,
            dimension_violations: 0,
        };

        let mut importance_sum = 0.0f32;
        for memory in &memories {
            if memory.supersedes.is_some() {
                report.superseding += 1;
            }
            if memory.embedding.data.len() as i32 != self.config.dimension {
                report.dimension_violations += 1;
            }
            if !memory.is_live() {
                report.total_soft_deleted += 1;
                continue;
            }
            report.total_live += 1;
            *report
                .by_category
                .entry(memory.category.as_db_str().to_string())
                .or_insert(0) += 1;
            if memory.access_count == 0 {
                report.never_accessed += 1;
            }
            if memory.confidence < 0.5 {
                report.low_confidence += 1;
            }
            importance_sum += memory.importance;
        }

        if report.total_live > 0 {
            report.avg_importance = importance_sum / report.total_live as f32;
        }

        Ok(report)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Fetch a live memory and verify ownership. Missing, deleted, and
    /// foreign rows are indistinguishable to the caller.
    async fn get_owned(
        &self,
        user: &UserId,
        memory_id: MemoryId,
        deadline: Deadline,
    ) -> EngramResult<Memory> {
        self.store
            .memory_get(memory_id, deadline)
            .await?
            .filter(|m| &m.user_id == user && m.is_live())
            .ok_or_else(|| not_found(memory_id))
    }
}

fn not_found(memory_id: MemoryId) -> EngramError {
    EngramError::Store(StoreError::NotFound {
        entity_type: EntityType::Memory,
        id: memory_id.to_string(),
    })
}

/// Shallow-merge new metadata keys into the existing object. Non-object
/// values replace wholesale.
fn merge_metadata(
    existing: Option<serde_json::Value>,
    new: serde_json::Value,
) -> serde_json::Value {
    match (existing, new) {
        (Some(serde_json::Value::Object(mut base)), serde_json::Value::Object(incoming)) => {
            for (key, value) in incoming {
                base.insert(key, value);
            }
            serde_json::Value::Object(base)
        }
        (_, new) => new,
    }
}

impl std::fmt::Debug for LongTermMemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTermMemoryManager").finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use engram_llm::{MockChatProvider, MockEmbeddingProvider};
    use engram_storage::{MockStore, StoreBackend};

    const DIM: i32 = 64;

    struct Harness {
        manager: LongTermMemoryManager,
        store: Arc<MockStore>,
        chat: Arc<MockChatProvider>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MockStore::new());
        let chat = Arc::new(MockChatProvider::new());
        let model = Arc::new(ModelGateway::new(
            Arc::new(MockEmbeddingProvider::new("mock-embed", DIM)),
            Arc::clone(&chat) as Arc<dyn engram_llm::ChatProvider>,
        ));
        let config = Arc::new(EngramConfig {
            dimension: DIM,
            ..Default::default()
        });
        let gateway = Arc::new(StoreGateway::new(
            Arc::clone(&store) as Arc<dyn engram_storage::StoreBackend>,
            config.store_retry.clone(),
        ));
        Harness {
            manager: LongTermMemoryManager::new(gateway, model, config),
            store,
            chat,
        }
    }

    fn user(name: &str) -> UserId {
        UserId::new(name)
    }

    fn hinted(content: &str) -> StoreMemoryRequest {
        StoreMemoryRequest {
            content: content.to_string(),
            category: Some(MemoryCategory::Semantic),
            subtype: Some(MemorySubtype::Project),
            entities: Some(vec![]),
            ..Default::default()
        }
    }

    /// Seed a memory directly through the backend with an explicit
    /// embedding, bypassing the dedup gate. Unit-axis embeddings keep
    /// seeded memories mutually orthogonal.
    fn raw_memory(u: &UserId, content: &str, embedding: Vec<f32>) -> Memory {
        let mut data = embedding;
        data.resize(DIM as usize, 0.0);
        let now = Utc::now();
        Memory {
            memory_id: MemoryId::now_v7(),
            user_id: u.clone(),
            category: MemoryCategory::Semantic,
            subtype: MemorySubtype::Project,
            content: content.to_string(),
            summary: None,
            embedding: engram_core::EmbeddingVector::new(data, "mock-embed".to_string()),
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

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM as usize];
        v[i] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_store_then_duplicate_merges() {
        let h = harness();
        let u = user("u1");

        let first = h
            .manager
            .store(&u, hinted("Project uses PostgreSQL 15"), Deadline::none())
            .await
            .unwrap();
        assert_eq!(first.action, StoreAction::Stored);

        let second = h
            .manager
            .store(&u, hinted("Project uses PostgreSQL 15"), Deadline::none())
            .await
            .unwrap();
        assert_eq!(second.action, StoreAction::MergedWithExisting);
        assert_eq!(second.memory_id, first.memory_id);
        assert_eq!(h.store.memory_count(), 1);

        let results = h
            .manager
            .recall(&u, "postgres", RecallFilter::default(), 10, Some(0.0), None, Deadline::none())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_store_without_hints_classifies() {
        let h = harness();
        h.chat.push_response(
            r#"{"category": "episodic", "subtype": "decision", "importance": 0.9,
                "entities": ["technology:postgresql"], "is_temporal": true, "summary": "Chose postgres"}"#,
        );

        let outcome = h
            .manager
            .store(
                &user("u1"),
                StoreMemoryRequest {
                    content: "We decided to use PostgreSQL over MySQL".to_string(),
                    ..Default::default()
                },
                Deadline::none(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.action, StoreAction::Stored);

        let memories = h
            .manager
            .store
            .memories_for_user(&user("u1"), false, Deadline::none())
            .await
            .unwrap();
        let memory = &memories[0];
        assert_eq!(memory.category, MemoryCategory::Episodic);
        assert_eq!(memory.subtype, MemorySubtype::Decision);
        assert_eq!(memory.importance, 0.9);
        assert_eq!(memory.entities, vec!["technology:postgresql".to_string()]);
        assert!(memory.is_temporal);
        assert_eq!(memory.summary.as_deref(), Some("Chose postgres"));
    }

    #[tokio::test]
    async fn test_store_classification_fallback() {
        let h = harness();
        h.chat.push_response("not json at all");
        // extract_entities also gets a junk answer
        h.chat.push_response("no entities");

        let outcome = h
            .manager
            .store(
                &user("u1"),
                StoreMemoryRequest {
                    content: "Some unclassifiable note".to_string(),
                    ..Default::default()
                },
                Deadline::none(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.action, StoreAction::Stored);

        let memories = h
            .manager
            .store
            .memories_for_user(&user("u1"), false, Deadline::none())
            .await
            .unwrap();
        assert_eq!(memories[0].category, MemoryCategory::Semantic);
        assert_eq!(memories[0].subtype, MemorySubtype::Domain);
        assert_eq!(memories[0].importance, 0.5);
    }

    #[tokio::test]
    async fn test_blank_user_rejected() {
        let h = harness();
        let err = h
            .manager
            .store(&user(""), hinted("anything"), Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::Validation(_)));
        assert_eq!(h.store.memory_count(), 0);
    }

    #[tokio::test]
    async fn test_store_rejects_invalid_hint_pair() {
        let h = harness();
        let err = h
            .manager
            .store(
                &user("u1"),
                StoreMemoryRequest {
                    content: "content".to_string(),
                    category: Some(MemoryCategory::Episodic),
                    subtype: Some(MemorySubtype::Workflow),
                    ..Default::default()
                },
                Deadline::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngramError::Validation(ValidationError::InvalidCategoryPair { .. })
        ));
        assert_eq!(h.store.memory_count(), 0);
    }

    #[tokio::test]
    async fn test_security_violation_writes_nothing() {
        let h = harness();
        let u = user("u1");

        let err = h
            .manager
            .store(
                &u,
                hinted("OPENAI_API_KEY=sk-abc123def456ghi789jkl012mno345"),
                Deadline::none(),
            )
            .await
            .unwrap_err();
        match err {
            EngramError::Security(engram_core::SecurityError::CredentialDetected { patterns }) => {
                assert!(patterns.contains(&"openai_api_key".to_string()));
            }
            other => panic!("expected security error, got {:?}", other),
        }
        assert_eq!(h.store.memory_count(), 0);

        let results = h
            .manager
            .recall(&u, "OPENAI_API_KEY", RecallFilter::default(), 10, Some(0.0), None, Deadline::none())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_recall_bumps_access_and_logs() {
        let h = harness();
        let u = user("u1");
        h.manager
            .store(&u, hinted("Project uses PostgreSQL 15"), Deadline::none())
            .await
            .unwrap();

        let results = h
            .manager
            .recall(
                &u,
                "Project uses PostgreSQL 15",
                RecallFilter::default(),
                10,
                None,
                Some(SessionKey::new("s1")),
                Deadline::none(),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].similarity > 0.99);
        assert!(results[0].relevance > 0.0);

        let memories = h
            .manager
            .store
            .memories_for_user(&u, false, Deadline::none())
            .await
            .unwrap();
        assert_eq!(memories[0].access_count, 1);
        assert_eq!(h.store.access_log_len(), 1);
    }

    #[tokio::test]
    async fn test_cross_user_isolation() {
        let h = harness();
        h.manager
            .store(&user("a"), hinted("X marks the spot"), Deadline::none())
            .await
            .unwrap();

        let results = h
            .manager
            .recall(
                &user("b"),
                "X marks the spot",
                RecallFilter::default(),
                10,
                Some(0.0),
                None,
                Deadline::none(),
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_update_reembeds_changed_content() {
        let h = harness();
        let u = user("u1");
        let outcome = h
            .manager
            .store(&u, hinted("Project uses PostgreSQL 15"), Deadline::none())
            .await
            .unwrap();

        let before = h
            .manager
            .store
            .memory_get(outcome.memory_id, Deadline::none())
            .await
            .unwrap()
            .unwrap();

        let updated = h
            .manager
            .update(
                &u,
                outcome.memory_id,
                UpdateMemoryRequest {
                    content: Some("Project uses PostgreSQL 16".to_string()),
                    metadata: Some(serde_json::json!({"verified": true})),
                    ..Default::default()
                },
                Deadline::none(),
            )
            .await
            .unwrap();

        assert_eq!(updated.content, "Project uses PostgreSQL 16");
        assert_ne!(updated.embedding.data, before.embedding.data);
        assert_eq!(updated.metadata, Some(serde_json::json!({"verified": true})));
        assert!(updated.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn test_update_rejects_credentials() {
        let h = harness();
        let u = user("u1");
        let outcome = h
            .manager
            .store(&u, hinted("harmless"), Deadline::none())
            .await
            .unwrap();

        let err = h
            .manager
            .update(
                &u,
                outcome.memory_id,
                UpdateMemoryRequest {
                    content: Some("password=supersecretvalue".to_string()),
                    ..Default::default()
                },
                Deadline::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::Security(_)));

        let unchanged = h
            .manager
            .store
            .memory_get(outcome.memory_id, Deadline::none())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.content, "harmless");
    }

    #[tokio::test]
    async fn test_metadata_merge_preserves_existing_keys() {
        let h = harness();
        let u = user("u1");
        let outcome = h
            .manager
            .store(
                &u,
                StoreMemoryRequest {
                    metadata: Some(serde_json::json!({"origin": "test", "n": 1})),
                    ..hinted("with metadata")
                },
                Deadline::none(),
            )
            .await
            .unwrap();

        let updated = h
            .manager
            .update(
                &u,
                outcome.memory_id,
                UpdateMemoryRequest {
                    metadata: Some(serde_json::json!({"n": 2, "extra": "yes"})),
                    ..Default::default()
                },
                Deadline::none(),
            )
            .await
            .unwrap();

        assert_eq!(
            updated.metadata,
            Some(serde_json::json!({"origin": "test", "n": 2, "extra": "yes"}))
        );
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_recall() {
        let h = harness();
        let u = user("u1");
        let outcome = h
            .manager
            .store(&u, hinted("forget me softly"), Deadline::none())
            .await
            .unwrap();

        h.manager
            .forget(&u, outcome.memory_id, false, Deadline::none())
            .await
            .unwrap();

        let results = h
            .manager
            .recall(&u, "forget me softly", RecallFilter::default(), 10, Some(0.0), None, Deadline::none())
            .await
            .unwrap();
        assert!(results.is_empty());

        // Restoration brings it back
        h.manager
            .restore(&u, outcome.memory_id, Deadline::none())
            .await
            .unwrap();
        let results = h
            .manager
            .recall(&u, "forget me softly", RecallFilter::default(), 10, Some(0.0), None, Deadline::none())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_hard_delete_prunes_relationships() {
        let h = harness();
        let u = user("u1");
        let a = raw_memory(&u, "alpha version note", axis(0));
        let b = raw_memory(&u, "completely different content", axis(1));
        h.store.memory_insert(&a).await.unwrap();
        h.store.memory_insert(&b).await.unwrap();

        h.manager
            .supersede(&u, a.memory_id, b.memory_id, Deadline::none())
            .await
            .unwrap();
        assert_eq!(h.store.relationship_count(), 1);

        // The old memory is already soft-deleted; hard-delete the new one
        h.manager
            .forget(&u, b.memory_id, true, Deadline::none())
            .await
            .unwrap();
        assert_eq!(h.store.relationship_count(), 0);
    }

    #[tokio::test]
    async fn test_supersession_semantics() {
        let h = harness();
        let u = user("u1");
        let old = raw_memory(&u, "Project uses PostgreSQL 15", axis(0));
        let new = raw_memory(&u, "The service has moved to MySQL", axis(1));
        h.store.memory_insert(&old).await.unwrap();
        h.store.memory_insert(&new).await.unwrap();

        h.manager
            .supersede(&u, old.memory_id, new.memory_id, Deadline::none())
            .await
            .unwrap();

        let old_memory = h
            .manager
            .store
            .memory_get(old.memory_id, Deadline::none())
            .await
            .unwrap()
            .unwrap();
        assert!(old_memory.deleted_at.is_some());

        let new_memory = h
            .manager
            .store
            .memory_get(new.memory_id, Deadline::none())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new_memory.supersedes, Some(old.memory_id));

        let edges = h
            .manager
            .store
            .relationships_for_memory(old.memory_id, Deadline::none())
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_id, old.memory_id);
        assert_eq!(edges[0].target_id, new.memory_id);
        assert_eq!(edges[0].kind, RelationshipKind::Updates);

        // Superseded memory never comes back from recall
        let results = h
            .manager
            .recall(&u, "Project uses PostgreSQL 15", RecallFilter::default(), 10, Some(0.0), None, Deadline::none())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.memory.memory_id != old.memory_id));
    }

    #[tokio::test]
    async fn test_supersede_requires_same_user() {
        let h = harness();
        let a = raw_memory(&user("a"), "owned by a", axis(0));
        let b = raw_memory(&user("b"), "owned by b", axis(1));
        h.store.memory_insert(&a).await.unwrap();
        h.store.memory_insert(&b).await.unwrap();

        let err = h
            .manager
            .supersede(&user("a"), a.memory_id, b.memory_id, Deadline::none())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_forget_all_requires_confirmation() {
        let h = harness();
        let u = user("u1");
        h.manager
            .store(&u, hinted("will survive"), Deadline::none())
            .await
            .unwrap();

        let err = h
            .manager
            .forget_all(&u, "yes please", Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngramError::Validation(ValidationError::ConfirmationRequired { .. })
        ));
        assert_eq!(h.store.memory_count(), 1);

        let removed = h
            .manager
            .forget_all(&u, CONFIRM_DELETE_ALL, Deadline::none())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(h.store.memory_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_decay_floors_importance() {
        let h = harness();
        let u = user("u1");
        let outcome = h
            .manager
            .store(
                &u,
                StoreMemoryRequest {
                    importance: Some(0.12),
                    ..hinted("old and idle")
                },
                Deadline::none(),
            )
            .await
            .unwrap();

        // Backdate last access beyond the inactivity window
        h.store
            .memory_insert(&{
                let mut m = h
                    .store
                    .memory_get(outcome.memory_id)
                    .await
                    .unwrap()
                    .unwrap();
                m.last_accessed_at = Utc::now() - Duration::days(30);
                m
            })
            .await
            .unwrap();

        let result = h
            .manager
            .apply_decay(&u, Some(0.5), Some(7), Deadline::none())
            .await
            .unwrap();
        assert_eq!(result.examined, 1);
        assert_eq!(result.decayed, 1);

        let memory = h
            .store
            .memory_get(outcome.memory_id)
            .await
            .unwrap()
            .unwrap();
        // 0.12 * 0.5 = 0.06 clamps to the 0.1 floor
        assert!((memory.importance - 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_decay_skips_recently_accessed() {
        let h = harness();
        let u = user("u1");
        h.manager
            .store(&u, hinted("fresh memory"), Deadline::none())
            .await
            .unwrap();

        let result = h
            .manager
            .apply_decay(&u, None, None, Deadline::none())
            .await
            .unwrap();
        assert_eq!(result.examined, 1);
        assert_eq!(result.decayed, 0);
    }

    #[tokio::test]
    async fn test_find_contradictions() {
        let h = harness();
        let u = user("u1");

        // Embeddings at cosine 0.8: similar enough to contradict, with
        // fully disjoint vocabulary (Jaccard 0).
        let mut older = raw_memory(&u, "deploys run on fridays", axis(0));
        older.created_at = Utc::now() - Duration::days(2);
        let mut close = axis(0);
        close[0] = 0.8;
        close[1] = 0.6;
        let newer = raw_memory(&u, "weekend shipping is banned", close);
        // Unrelated memory on another axis stays out of the candidate set
        let unrelated = raw_memory(&u, "the cache lives in redis", axis(5));

        h.store.memory_insert(&older).await.unwrap();
        h.store.memory_insert(&newer).await.unwrap();
        h.store.memory_insert(&unrelated).await.unwrap();

        let candidates = h
            .manager
            .find_contradictions(&u, Deadline::none())
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.older_id, older.memory_id);
        assert_eq!(candidate.newer_id, newer.memory_id);
        assert!(candidate.similarity >= 0.75);
        assert!(candidate.jaccard < 0.5);
    }

    #[tokio::test]
    async fn test_contradiction_skips_shared_vocabulary() {
        let h = harness();
        let u = user("u1");

        // Near-identical embeddings AND near-identical wording: a restated
        // fact, not a contradiction.
        let a = raw_memory(&u, "the api uses postgres fifteen", axis(0));
        let mut close = axis(0);
        close[0] = 0.9;
        close[1] = 0.43;
        let b = raw_memory(&u, "the api uses postgres", close);
        h.store.memory_insert(&a).await.unwrap();
        h.store.memory_insert(&b).await.unwrap();

        let candidates = h
            .manager
            .find_contradictions(&u, Deadline::none())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_quality_report() {
        let h = harness();
        let u = user("u1");
        let kept = raw_memory(&u, "memory one about databases", axis(0));
        let mut dropped = raw_memory(&u, "memory two entirely unrelated topic", axis(1));
        dropped.confidence = 0.2;
        h.store.memory_insert(&kept).await.unwrap();
        h.store.memory_insert(&dropped).await.unwrap();

        h.manager
            .forget(&u, dropped.memory_id, false, Deadline::none())
            .await
            .unwrap();

        let report = h.manager.quality_report(&u, Deadline::none()).await.unwrap();
        assert_eq!(report.total_live, 1);
        assert_eq!(report.total_soft_deleted, 1);
        assert_eq!(report.by_category.get("semantic"), Some(&1));
        assert_eq!(report.never_accessed, 1);
        assert_eq!(report.dimension_violations, 0);
    }
}
