//! PostgreSQL backend
//!
//! Production [`StoreBackend`] over deadpool-postgres. The embedding column
//! uses the pgvector `vector(D)` type with the `<=>` cosine-distance
//! operator; similarity is `1 - distance`. The dimension is fixed at
//! index-creation time, so tables and the vector index are created before
//! the first insert and changing D requires re-embedding every row.

use crate::{
    ItemUpdate, MemoryUpdate, ServiceMetricRow, StoreBackend, ToolErrorRow, VectorSearchHit,
    VectorSearchRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use engram_core::{
    AccessLogEntry, AccessId, ContentType, EmbeddingVector, EngramError, EngramResult, EntityType,
    ItemId, Memory, MemoryCategory, MemoryId, MemoryRelationship, MemorySubtype, RelationshipId,
    RelationshipKind, Session, SessionKey, SourceType, StoreError, Timestamp, UserId, WorkingItem,
};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password (arrives via the configuration channel only)
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "engram".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 32,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PgConfig {
    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> EngramResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                EngramError::Store(StoreError::Backend {
                    reason: format!("Failed to create pool: {}", e),
                })
            })?;

        Ok(pool)
    }
}

// ============================================================================
// BACKEND
// ============================================================================

/// PostgreSQL store backend.
pub struct PgStore {
    pool: Pool,
    dimension: i32,
}

impl PgStore {
    /// Create a new backend with an existing pool.
    pub fn new(pool: Pool, dimension: i32) -> Self {
        Self { pool, dimension }
    }

    /// Create a backend from configuration.
    pub fn from_config(config: &PgConfig, dimension: i32) -> EngramResult<Self> {
        Ok(Self::new(config.create_pool()?, dimension))
    }

    /// Current pool size and available connections, for health reporting.
    pub fn pool_status(&self) -> (usize, usize) {
        let status = self.pool.status();
        (status.size, status.available)
    }

    async fn conn(&self) -> EngramResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| match e {
            deadpool_postgres::PoolError::Timeout(_) => {
                EngramError::Store(StoreError::PoolExhausted)
            }
            other => EngramError::Store(StoreError::Backend {
                reason: format!("Failed to acquire connection: {}", other),
            }),
        })
    }

    /// Create tables and indexes. Must run before the first insert: the
    /// vector index has to exist before data arrives, and its dimension is
    /// fixed here.
    pub async fn ensure_schema(&self) -> EngramResult<()> {
        let conn = self.conn().await?;

        conn.batch_execute("CREATE EXTENSION IF NOT EXISTS vector")
            .await
            .map_err(|e| {
                EngramError::Store(StoreError::Backend {
                    reason: format!(
                        "Extension 'vector' (pgvector) is not installable: {}. \
                         Run: CREATE EXTENSION IF NOT EXISTS vector;",
                        e
                    ),
                })
            })?;

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_key      TEXT PRIMARY KEY,
                user_id          TEXT NOT NULL,
                org_id           TEXT,
                max_tokens       INT4 NOT NULL,
                current_tokens   INT4 NOT NULL,
                created_at       TIMESTAMPTZ NOT NULL,
                last_active_at   TIMESTAMPTZ NOT NULL,
                expires_at       TIMESTAMPTZ,
                config           JSONB
            );
            CREATE INDEX IF NOT EXISTS sessions_user_idx ON sessions (user_id);

            CREATE TABLE IF NOT EXISTS working_memory_items (
                item_id          UUID PRIMARY KEY,
                session_key      TEXT NOT NULL,
                content_type     TEXT NOT NULL,
                content          TEXT NOT NULL,
                token_count      INT4 NOT NULL,
                relevance        FLOAT4 NOT NULL,
                pinned           BOOL NOT NULL,
                sequence         INT8 NOT NULL,
                created_at       TIMESTAMPTZ NOT NULL,
                last_accessed_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS working_memory_items_session_idx
                ON working_memory_items (session_key, sequence);

            CREATE TABLE IF NOT EXISTS long_term_memories (
                memory_id        UUID PRIMARY KEY,
                user_id          TEXT NOT NULL,
                category         TEXT NOT NULL,
                subtype          TEXT NOT NULL,
                content          TEXT NOT NULL,
                summary          TEXT,
                embedding        vector({dim}) NOT NULL,
                embedding_model  TEXT NOT NULL,
                entities         TEXT[] NOT NULL,
                metadata         JSONB,
                event_at         TIMESTAMPTZ,
                is_temporal      BOOL NOT NULL,
                importance       FLOAT4 NOT NULL,
                access_count     INT4 NOT NULL,
                decay_factor     FLOAT4 NOT NULL,
                supersedes       UUID,
                source_session   TEXT,
                source_type      TEXT NOT NULL,
                confidence       FLOAT4 NOT NULL,
                created_at       TIMESTAMPTZ NOT NULL,
                last_accessed_at TIMESTAMPTZ NOT NULL,
                updated_at       TIMESTAMPTZ NOT NULL,
                deleted_at       TIMESTAMPTZ
            );
            CREATE INDEX IF NOT EXISTS long_term_memories_user_idx
                ON long_term_memories (user_id, category, subtype);
            CREATE INDEX IF NOT EXISTS long_term_memories_embedding_idx
                ON long_term_memories USING hnsw (embedding vector_cosine_ops);

            CREATE TABLE IF NOT EXISTS memory_relationships (
                relationship_id  UUID PRIMARY KEY,
                source_id        UUID NOT NULL,
                target_id        UUID NOT NULL,
                kind             TEXT NOT NULL,
                strength         FLOAT4 NOT NULL,
                context          TEXT,
                created_at       TIMESTAMPTZ NOT NULL,
                created_by       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS memory_relationships_source_idx
                ON memory_relationships (source_id);
            CREATE INDEX IF NOT EXISTS memory_relationships_target_idx
                ON memory_relationships (target_id);

            CREATE TABLE IF NOT EXISTS access_log (
                access_id        UUID PRIMARY KEY,
                memory_id        UUID NOT NULL,
                session_key      TEXT,
                user_id          TEXT NOT NULL,
                query            TEXT NOT NULL,
                similarity       FLOAT4 NOT NULL,
                was_useful       BOOL,
                was_used         BOOL,
                accessed_at      TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS access_log_user_idx
                ON access_log (user_id, accessed_at);

            CREATE TABLE IF NOT EXISTS tool_error_log (
                id               BIGSERIAL PRIMARY KEY,
                tool             TEXT NOT NULL,
                code             TEXT NOT NULL,
                message          TEXT NOT NULL,
                occurred_at      TIMESTAMPTZ NOT NULL
            );

            CREATE TABLE IF NOT EXISTS service_metrics (
                id               BIGSERIAL PRIMARY KEY,
                operation        TEXT NOT NULL,
                provider         TEXT NOT NULL,
                latency_ms       INT8 NOT NULL,
                success          BOOL NOT NULL,
                input_tokens     INT4 NOT NULL,
                output_tokens    INT4 NOT NULL,
                recorded_at      TIMESTAMPTZ NOT NULL
            );
            "#,
            dim = self.dimension
        );

        conn.batch_execute(&ddl).await.map_err(map_pg_err)?;
        Ok(())
    }
}

// ============================================================================
// ERROR AND VALUE MAPPING
// ============================================================================

/// Map a postgres error onto the store error taxonomy. Serialization
/// failures and deadlocks are retryable conflicts; everything else is a
/// structural backend error.
fn map_pg_err(e: tokio_postgres::Error) -> EngramError {
    if let Some(db_err) = e.as_db_error() {
        if db_err.code() == &SqlState::T_R_SERIALIZATION_FAILURE
            || db_err.code() == &SqlState::T_R_DEADLOCK_DETECTED
        {
            return EngramError::Store(StoreError::Conflict {
                reason: db_err.message().to_string(),
            });
        }
    }
    EngramError::Store(StoreError::Backend {
        reason: e.to_string(),
    })
}

/// Format an embedding as a pgvector literal: `[1,2,3]`.
fn vector_literal(embedding: &EmbeddingVector) -> String {
    let parts: Vec<String> = embedding.data.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Parse a pgvector text representation back into components.
fn parse_vector(text: &str, expected: i32, id: &str) -> EngramResult<Vec<f32>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| {
            EngramError::Store(StoreError::Backend {
                reason: format!("Unparseable vector text for row {}", id),
            })
        })?;

    let data: Result<Vec<f32>, _> = inner
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect();
    let data = data.map_err(|_| {
        EngramError::Store(StoreError::Backend {
            reason: format!("Unparseable vector component for row {}", id),
        })
    })?;

    if data.len() as i32 != expected {
        return Err(EngramError::Store(StoreError::MalformedVector {
            id: id.to_string(),
            expected,
            got: data.len() as i32,
        }));
    }
    Ok(data)
}

fn enum_err(e: engram_core::EnumParseError) -> EngramError {
    EngramError::Store(StoreError::Backend {
        reason: e.to_string(),
    })
}

// ============================================================================
// ROW MAPPERS
// ============================================================================

fn session_from_row(row: &Row) -> EngramResult<Session> {
    Ok(Session {
        session_key: SessionKey::new(row.get::<_, String>(0)),
        user_id: UserId::new(row.get::<_, String>(1)),
        org_id: row.get(2),
        max_tokens: row.get(3),
        current_tokens: row.get(4),
        created_at: row.get(5),
        last_active_at: row.get(6),
        expires_at: row.get(7),
        config: row.get(8),
    })
}

const SESSION_COLUMNS: &str = "session_key, user_id, org_id, max_tokens, current_tokens, \
     created_at, last_active_at, expires_at, config";

fn item_from_row(row: &Row) -> EngramResult<WorkingItem> {
    Ok(WorkingItem {
        item_id: ItemId::new(row.get::<_, Uuid>(0)),
        session_key: SessionKey::new(row.get::<_, String>(1)),
        content_type: ContentType::from_db_str(row.get(2)).map_err(enum_err)?,
        content: row.get(3),
        token_count: row.get(4),
        relevance: row.get(5),
        pinned: row.get(6),
        sequence: row.get(7),
        created_at: row.get(8),
        last_accessed_at: row.get(9),
    })
}

const ITEM_COLUMNS: &str = "item_id, session_key, content_type, content, token_count, \
     relevance, pinned, sequence, created_at, last_accessed_at";

const MEMORY_COLUMNS: &str = "memory_id, user_id, category, subtype, content, summary, \
     embedding::text, embedding_model, entities, metadata, event_at, is_temporal, importance, \
     access_count, decay_factor, supersedes, source_session, source_type, confidence, \
     created_at, last_accessed_at, updated_at, deleted_at";

fn memory_from_row(row: &Row, dimension: i32) -> EngramResult<Memory> {
    let memory_id = MemoryId::new(row.get::<_, Uuid>(0));
    let vector_text: String = row.get(6);
    let data = parse_vector(&vector_text, dimension, &memory_id.to_string())?;
    let embedding_model: String = row.get(7);

    Ok(Memory {
        memory_id,
        user_id: UserId::new(row.get::<_, String>(1)),
        category: MemoryCategory::from_db_str(row.get(2)).map_err(enum_err)?,
        subtype: MemorySubtype::from_db_str(row.get(3)).map_err(enum_err)?,
        content: row.get(4),
        summary: row.get(5),
        embedding: EmbeddingVector::new(data, embedding_model),
        entities: row.get(8),
        metadata: row.get(9),
        event_at: row.get(10),
        is_temporal: row.get(11),
        importance: row.get(12),
        access_count: row.get(13),
        decay_factor: row.get(14),
        supersedes: row.get::<_, Option<Uuid>>(15).map(MemoryId::new),
        source_session: row
            .get::<_, Option<String>>(16)
            .map(SessionKey::new),
        source_type: SourceType::from_db_str(row.get(17)).map_err(enum_err)?,
        confidence: row.get(18),
        created_at: row.get(19),
        last_accessed_at: row.get(20),
        updated_at: row.get(21),
        deleted_at: row.get(22),
    })
}

fn relationship_from_row(row: &Row) -> EngramResult<MemoryRelationship> {
    Ok(MemoryRelationship {
        relationship_id: RelationshipId::new(row.get::<_, Uuid>(0)),
        source_id: MemoryId::new(row.get::<_, Uuid>(1)),
        target_id: MemoryId::new(row.get::<_, Uuid>(2)),
        kind: RelationshipKind::from_db_str(row.get(3)).map_err(enum_err)?,
        strength: row.get(4),
        context: row.get(5),
        created_at: row.get(6),
        created_by: row.get(7),
    })
}

const RELATIONSHIP_COLUMNS: &str =
    "relationship_id, source_id, target_id, kind, strength, context, created_at, created_by";

fn access_from_row(row: &Row) -> EngramResult<AccessLogEntry> {
    Ok(AccessLogEntry {
        access_id: AccessId::new(row.get::<_, Uuid>(0)),
        memory_id: MemoryId::new(row.get::<_, Uuid>(1)),
        session_key: row.get::<_, Option<String>>(2).map(SessionKey::new),
        user_id: UserId::new(row.get::<_, String>(3)),
        query: row.get(4),
        similarity: row.get(5),
        was_useful: row.get(6),
        was_used: row.get(7),
        accessed_at: row.get(8),
    })
}

const ACCESS_COLUMNS: &str = "access_id, memory_id, session_key, user_id, query, similarity, \
     was_useful, was_used, accessed_at";

// ============================================================================
// STORE BACKEND IMPLEMENTATION
// ============================================================================

#[async_trait]
impl StoreBackend for PgStore {
    async fn ping(&self) -> EngramResult<()> {
        let conn = self.conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(map_pg_err)?;
        Ok(())
    }

    // === Sessions ===

    async fn session_get(&self, key: &SessionKey) -> EngramResult<Option<Session>> {
        let conn = self.conn().await?;
        let sql = format!("SELECT {} FROM sessions WHERE session_key = $1", SESSION_COLUMNS);
        let row = conn
            .query_opt(sql.as_str(), &[&key.as_str()])
            .await
            .map_err(map_pg_err)?;
        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn session_put(&self, session: &Session) -> EngramResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO sessions (session_key, user_id, org_id, max_tokens, current_tokens, \
                 created_at, last_active_at, expires_at, config) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (session_key) DO UPDATE SET \
                 user_id = EXCLUDED.user_id, \
                 org_id = EXCLUDED.org_id, \
                 max_tokens = EXCLUDED.max_tokens, \
                 current_tokens = EXCLUDED.current_tokens, \
                 created_at = EXCLUDED.created_at, \
                 last_active_at = EXCLUDED.last_active_at, \
                 expires_at = EXCLUDED.expires_at, \
                 config = EXCLUDED.config",
            &[
                &session.session_key.as_str(),
                &session.user_id.as_str(),
                &session.org_id,
                &session.max_tokens,
                &session.current_tokens,
                &session.created_at,
                &session.last_active_at,
                &session.expires_at,
                &session.config,
            ],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }

    // === Working-Memory Items ===

    async fn item_insert(&self, item: &WorkingItem) -> EngramResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO working_memory_items (item_id, session_key, content_type, content, \
                 token_count, relevance, pinned, sequence, created_at, last_accessed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &item.item_id.as_uuid(),
                &item.session_key.as_str(),
                &item.content_type.as_db_str(),
                &item.content,
                &item.token_count,
                &item.relevance,
                &item.pinned,
                &item.sequence,
                &item.created_at,
                &item.last_accessed_at,
            ],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }

    async fn item_get(&self, id: ItemId) -> EngramResult<Option<WorkingItem>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM working_memory_items WHERE item_id = $1",
            ITEM_COLUMNS
        );
        let row = conn
            .query_opt(sql.as_str(), &[&id.as_uuid()])
            .await
            .map_err(map_pg_err)?;
        row.map(|r| item_from_row(&r)).transpose()
    }

    async fn item_update(&self, id: ItemId, update: ItemUpdate) -> EngramResult<()> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE working_memory_items SET \
                     pinned = COALESCE($2, pinned), \
                     relevance = COALESCE($3, relevance), \
                     last_accessed_at = COALESCE($4, last_accessed_at) \
                 WHERE item_id = $1",
                &[
                    &id.as_uuid(),
                    &update.pinned,
                    &update.relevance,
                    &update.last_accessed_at,
                ],
            )
            .await
            .map_err(map_pg_err)?;
        if updated == 0 {
            return Err(EngramError::Store(StoreError::NotFound {
                entity_type: EntityType::WorkingItem,
                id: id.to_string(),
            }));
        }
        Ok(())
    }

    async fn items_for_session(&self, key: &SessionKey) -> EngramResult<Vec<WorkingItem>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM working_memory_items WHERE session_key = $1 ORDER BY sequence",
            ITEM_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&key.as_str()])
            .await
            .map_err(map_pg_err)?;
        rows.iter().map(item_from_row).collect()
    }

    async fn items_delete(&self, key: &SessionKey, ids: &[ItemId]) -> EngramResult<()> {
        let conn = self.conn().await?;
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        conn.execute(
            "DELETE FROM working_memory_items WHERE session_key = $1 AND item_id = ANY($2)",
            &[&key.as_str(), &uuids],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }

    async fn items_clear(&self, key: &SessionKey) -> EngramResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM working_memory_items WHERE session_key = $1",
            &[&key.as_str()],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }

    // === Long-Term Memories ===

    async fn memory_insert(&self, memory: &Memory) -> EngramResult<()> {
        let conn = self.conn().await?;
        let vector = vector_literal(&memory.embedding);
        let supersedes = memory.supersedes.map(|id| id.as_uuid());
        let source_session = memory.source_session.as_ref().map(|key| key.as_str());
        conn.execute(
            "INSERT INTO long_term_memories (memory_id, user_id, category, subtype, content, \
                 summary, embedding, embedding_model, entities, metadata, event_at, is_temporal, \
                 importance, access_count, decay_factor, supersedes, source_session, source_type, \
                 confidence, created_at, last_accessed_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7::vector, $8, $9, $10, $11, $12, $13, $14, $15, \
                 $16, $17, $18, $19, $20, $21, $22, $23)",
            &[
                &memory.memory_id.as_uuid(),
                &memory.user_id.as_str(),
                &memory.category.as_db_str(),
                &memory.subtype.as_db_str(),
                &memory.content,
                &memory.summary,
                &vector,
                &memory.embedding.model_id,
                &memory.entities,
                &memory.metadata,
                &memory.event_at,
                &memory.is_temporal,
                &memory.importance,
                &memory.access_count,
                &memory.decay_factor,
                &supersedes,
                &source_session,
                &memory.source_type.as_db_str(),
                &memory.confidence,
                &memory.created_at,
                &memory.last_accessed_at,
                &memory.updated_at,
                &memory.deleted_at,
            ],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }

    async fn memory_get(&self, id: MemoryId) -> EngramResult<Option<Memory>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM long_term_memories WHERE memory_id = $1",
            MEMORY_COLUMNS
        );
        let row = conn
            .query_opt(sql.as_str(), &[&id.as_uuid()])
            .await
            .map_err(map_pg_err)?;
        row.map(|r| memory_from_row(&r, self.dimension)).transpose()
    }

    async fn memory_update(&self, id: MemoryId, update: MemoryUpdate) -> EngramResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        let conn = self.conn().await?;

        let embedding_literal = update.embedding.as_ref().map(vector_literal);
        let embedding_model = update.embedding.as_ref().map(|e| e.model_id.clone());
        let supersedes = update.supersedes.map(|s| s.as_uuid());

        let updated = conn
            .execute(
                "UPDATE long_term_memories SET \
                     content = COALESCE($2, content), \
                     summary = COALESCE($3, summary), \
                     embedding = COALESCE($4::vector, embedding), \
                     embedding_model = COALESCE($5, embedding_model), \
                     entities = COALESCE($6, entities), \
                     metadata = COALESCE($7, metadata), \
                     importance = COALESCE($8, importance), \
                     confidence = COALESCE($9, confidence), \
                     is_temporal = COALESCE($10, is_temporal), \
                     event_at = COALESCE($11, event_at), \
                     supersedes = COALESCE($12, supersedes), \
                     updated_at = COALESCE($13, updated_at) \
                 WHERE memory_id = $1",
                &[
                    &id.as_uuid(),
                    &update.content,
                    &update.summary,
                    &embedding_literal,
                    &embedding_model,
                    &update.entities,
                    &update.metadata,
                    &update.importance,
                    &update.confidence,
                    &update.is_temporal,
                    &update.event_at,
                    &supersedes,
                    &update.updated_at,
                ],
            )
            .await
            .map_err(map_pg_err)?;
        if updated == 0 {
            return Err(EngramError::Store(StoreError::NotFound {
                entity_type: EntityType::Memory,
                id: id.to_string(),
            }));
        }
        Ok(())
    }

    async fn memory_touch(&self, ids: &[MemoryId], at: Timestamp) -> EngramResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn().await?;
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        conn.execute(
            "UPDATE long_term_memories SET \
                 access_count = access_count + 1, \
                 last_accessed_at = $2 \
             WHERE memory_id = ANY($1)",
            &[&uuids, &at],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }

    async fn memory_set_deleted(
        &self,
        id: MemoryId,
        deleted_at: Option<Timestamp>,
    ) -> EngramResult<()> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE long_term_memories SET deleted_at = $2 WHERE memory_id = $1",
                &[&id.as_uuid(), &deleted_at],
            )
            .await
            .map_err(map_pg_err)?;
        if updated == 0 {
            return Err(EngramError::Store(StoreError::NotFound {
                entity_type: EntityType::Memory,
                id: id.to_string(),
            }));
        }
        Ok(())
    }

    async fn memory_hard_delete(&self, id: MemoryId) -> EngramResult<()> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM long_term_memories WHERE memory_id = $1",
                &[&id.as_uuid()],
            )
            .await
            .map_err(map_pg_err)?;
        if deleted == 0 {
            return Err(EngramError::Store(StoreError::NotFound {
                entity_type: EntityType::Memory,
                id: id.to_string(),
            }));
        }
        conn.execute(
            "DELETE FROM memory_relationships WHERE source_id = $1 OR target_id = $1",
            &[&id.as_uuid()],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }

    async fn memories_for_user(
        &self,
        user: &UserId,
        include_deleted: bool,
    ) -> EngramResult<Vec<Memory>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM long_term_memories \
             WHERE user_id = $1 AND ($2 OR deleted_at IS NULL) \
             ORDER BY created_at DESC",
            MEMORY_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&user.as_str(), &include_deleted])
            .await
            .map_err(map_pg_err)?;
        rows.iter()
            .map(|r| memory_from_row(r, self.dimension))
            .collect()
    }

    async fn memory_delete_all_for_user(&self, user: &UserId) -> EngramResult<u64> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(map_pg_err)?;

        tx.execute(
            "DELETE FROM memory_relationships WHERE source_id IN \
                 (SELECT memory_id FROM long_term_memories WHERE user_id = $1) \
             OR target_id IN \
                 (SELECT memory_id FROM long_term_memories WHERE user_id = $1)",
            &[&user.as_str()],
        )
        .await
        .map_err(map_pg_err)?;

        let removed = tx
            .execute(
                "DELETE FROM long_term_memories WHERE user_id = $1",
                &[&user.as_str()],
            )
            .await
            .map_err(map_pg_err)?;

        tx.execute("DELETE FROM access_log WHERE user_id = $1", &[&user.as_str()])
            .await
            .map_err(map_pg_err)?;

        tx.execute(
            "DELETE FROM working_memory_items WHERE session_key IN \
                 (SELECT session_key FROM sessions WHERE user_id = $1)",
            &[&user.as_str()],
        )
        .await
        .map_err(map_pg_err)?;

        tx.execute("DELETE FROM sessions WHERE user_id = $1", &[&user.as_str()])
            .await
            .map_err(map_pg_err)?;

        tx.commit().await.map_err(map_pg_err)?;
        Ok(removed)
    }

    async fn memory_set_importance(&self, updates: &[(MemoryId, f32)]) -> EngramResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(map_pg_err)?;
        let stmt = tx
            .prepare("UPDATE long_term_memories SET importance = $2 WHERE memory_id = $1")
            .await
            .map_err(map_pg_err)?;
        for (id, importance) in updates {
            tx.execute(&stmt, &[&id.as_uuid(), importance])
                .await
                .map_err(map_pg_err)?;
        }
        tx.commit().await.map_err(map_pg_err)?;
        Ok(())
    }

    async fn vector_search(
        &self,
        request: &VectorSearchRequest,
    ) -> EngramResult<Vec<VectorSearchHit>> {
        let conn = self.conn().await?;
        let vector = vector_literal(&request.query);
        let min_similarity = request.min_similarity as f64;
        let limit = request.limit as i64;

        let categories: Option<Vec<String>> = request.filter.categories.as_ref().map(|cats| {
            cats.iter().map(|c| c.as_db_str().to_string()).collect()
        });
        let subtypes: Option<Vec<String>> = request.filter.subtypes.as_ref().map(|subs| {
            subs.iter().map(|s| s.as_db_str().to_string()).collect()
        });
        let entities: Option<Vec<String>> = request.filter.entities.clone();
        let event_after: Option<DateTime<Utc>> = request.filter.event_after;
        let event_before: Option<DateTime<Utc>> = request.filter.event_before;
        let confidence_floor: Option<f32> = request.filter.confidence_floor;

        let sql = format!(
            "SELECT {}, 1 - (embedding <=> $2::vector) AS similarity \
             FROM long_term_memories \
             WHERE user_id = $1 \
               AND deleted_at IS NULL \
               AND 1 - (embedding <=> $2::vector) >= $3 \
               AND ($4::text[] IS NULL OR category = ANY($4)) \
               AND ($5::text[] IS NULL OR subtype = ANY($5)) \
               AND ($6::text[] IS NULL OR entities && $6) \
               AND ($7::timestamptz IS NULL OR (event_at IS NOT NULL AND event_at >= $7)) \
               AND ($8::timestamptz IS NULL OR (event_at IS NOT NULL AND event_at <= $8)) \
               AND ($9::float4 IS NULL OR confidence >= $9) \
             ORDER BY embedding <=> $2::vector \
             LIMIT $10",
            MEMORY_COLUMNS
        );

        let rows = conn
            .query(
                sql.as_str(),
                &[
                    &request.user_id.as_str(),
                    &vector,
                    &min_similarity,
                    &categories,
                    &subtypes,
                    &entities,
                    &event_after,
                    &event_before,
                    &confidence_floor,
                    &limit,
                ],
            )
            .await
            .map_err(map_pg_err)?;

        rows.iter()
            .map(|row| {
                let memory = memory_from_row(row, self.dimension)?;
                let similarity: f64 = row.get(row.len() - 1);
                Ok(VectorSearchHit {
                    memory,
                    similarity: similarity as f32,
                })
            })
            .collect()
    }

    // === Relationships ===

    async fn relationship_insert(&self, rel: &MemoryRelationship) -> EngramResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO memory_relationships (relationship_id, source_id, target_id, kind, \
                 strength, context, created_at, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &rel.relationship_id.as_uuid(),
                &rel.source_id.as_uuid(),
                &rel.target_id.as_uuid(),
                &rel.kind.as_db_str(),
                &rel.strength,
                &rel.context,
                &rel.created_at,
                &rel.created_by,
            ],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }

    async fn relationships_for_memory(
        &self,
        id: MemoryId,
    ) -> EngramResult<Vec<MemoryRelationship>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM memory_relationships \
             WHERE source_id = $1 OR target_id = $1 \
             ORDER BY created_at",
            RELATIONSHIP_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&id.as_uuid()])
            .await
            .map_err(map_pg_err)?;
        rows.iter().map(relationship_from_row).collect()
    }

    // === Append-Only Tables ===

    async fn access_log_insert(&self, entries: &[AccessLogEntry]) -> EngramResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(map_pg_err)?;
        let stmt = tx
            .prepare(&format!(
                "INSERT INTO access_log ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                ACCESS_COLUMNS
            ))
            .await
            .map_err(map_pg_err)?;
        for entry in entries {
            let session_key = entry.session_key.as_ref().map(|key| key.as_str());
            tx.execute(
                &stmt,
                &[
                    &entry.access_id.as_uuid(),
                    &entry.memory_id.as_uuid(),
                    &session_key,
                    &entry.user_id.as_str(),
                    &entry.query,
                    &entry.similarity,
                    &entry.was_useful,
                    &entry.was_used,
                    &entry.accessed_at,
                ],
            )
            .await
            .map_err(map_pg_err)?;
        }
        tx.commit().await.map_err(map_pg_err)?;
        Ok(())
    }

    async fn access_log_for_user(
        &self,
        user: &UserId,
        limit: usize,
    ) -> EngramResult<Vec<AccessLogEntry>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM access_log WHERE user_id = $1 \
             ORDER BY accessed_at DESC LIMIT $2",
            ACCESS_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&user.as_str(), &(limit as i64)])
            .await
            .map_err(map_pg_err)?;
        rows.iter().map(access_from_row).collect()
    }

    async fn service_metrics_insert(&self, rows: &[ServiceMetricRow]) -> EngramResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(map_pg_err)?;
        let stmt = tx
            .prepare(
                "INSERT INTO service_metrics (operation, provider, latency_ms, success, \
                     input_tokens, output_tokens, recorded_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .await
            .map_err(map_pg_err)?;
        for row in rows {
            tx.execute(
                &stmt,
                &[
                    &row.operation,
                    &row.provider,
                    &row.latency_ms,
                    &row.success,
                    &row.input_tokens,
                    &row.output_tokens,
                    &row.recorded_at,
                ],
            )
            .await
            .map_err(map_pg_err)?;
        }
        tx.commit().await.map_err(map_pg_err)?;
        Ok(())
    }

    async fn tool_error_insert(&self, row: &ToolErrorRow) -> EngramResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO tool_error_log (tool, code, message, occurred_at) \
             VALUES ($1, $2, $3, $4)",
            &[&row.tool, &row.code, &row.message, &row.occurred_at],
        )
        .await
        .map_err(map_pg_err)?;
        Ok(())
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (size, available) = self.pool_status();
        f.debug_struct("PgStore")
            .field("dimension", &self.dimension)
            .field("pool_size", &size)
            .field("pool_available", &available)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        let embedding = EmbeddingVector::new(vec![1.0, -0.5, 0.25], "m".to_string());
        assert_eq!(vector_literal(&embedding), "[1,-0.5,0.25]");
    }

    #[test]
    fn test_parse_vector_round_trip() {
        let embedding = EmbeddingVector::new(vec![0.1, 0.2, 0.3], "m".to_string());
        let text = vector_literal(&embedding);
        let parsed = parse_vector(&text, 3, "row").unwrap();
        assert_eq!(parsed.len(), 3);
        assert!((parsed[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_parse_vector_dimension_mismatch() {
        let err = parse_vector("[1,2]", 3, "row").unwrap_err();
        assert!(matches!(
            err,
            EngramError::Store(StoreError::MalformedVector {
                expected: 3,
                got: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_vector_garbage_rejected() {
        assert!(parse_vector("not a vector", 3, "row").is_err());
        assert!(parse_vector("[a,b,c]", 3, "row").is_err());
    }
}
