//! Tool surface routes
//!
//! Exposes the fifteen named memory operations as JSON tool calls:
//! - GET  /tools/list - list available tools with input schemas
//! - POST /tools/call - execute a tool
//!
//! Unknown fields in requests are ignored; responses contain exactly the
//! documented fields.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use engram_core::{
    ContentType, Deadline, Intent, ItemId, Memory, MemoryCategory, MemoryId, MemorySubtype,
    RecallFilter, SessionKey, SourceType, Timestamp, UserId, WorkingItem,
};
use engram_context::ContextRequest;
use engram_memory::{AppendRequest, SessionOptions, StoreMemoryRequest, UpdateMemoryRequest};
use engram_storage::ToolErrorRow;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// PROTOCOL TYPES
// ============================================================================

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: JsonValue,
}

/// List tools response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResponse {
    /// Available tools
    pub tools: Vec<Tool>,
}

/// Tool call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(default)]
    pub arguments: JsonValue,
}

// ============================================================================
// WIRE VIEWS
// ============================================================================

/// Memory as returned on the wire. The raw embedding stays server-side;
/// only its model identifier travels.
#[derive(Debug, Clone, Serialize)]
struct MemoryView {
    memory_id: MemoryId,
    user_id: UserId,
    category: MemoryCategory,
    subtype: MemorySubtype,
    content: String,
    summary: Option<String>,
    embedding_model: String,
    entities: Vec<String>,
    metadata: Option<JsonValue>,
    event_at: Option<Timestamp>,
    is_temporal: bool,
    importance: f32,
    access_count: i32,
    decay_factor: f32,
    supersedes: Option<MemoryId>,
    source_session: Option<SessionKey>,
    source_type: SourceType,
    confidence: f32,
    created_at: Timestamp,
    last_accessed_at: Timestamp,
    updated_at: Timestamp,
    deleted_at: Option<Timestamp>,
}

impl From<Memory> for MemoryView {
    fn from(memory: Memory) -> Self {
        Self {
            memory_id: memory.memory_id,
            user_id: memory.user_id,
            category: memory.category,
            subtype: memory.subtype,
            content: memory.content,
            summary: memory.summary,
            embedding_model: memory.embedding.model_id,
            entities: memory.entities,
            metadata: memory.metadata,
            event_at: memory.event_at,
            is_temporal: memory.is_temporal,
            importance: memory.importance,
            access_count: memory.access_count,
            decay_factor: memory.decay_factor,
            supersedes: memory.supersedes,
            source_session: memory.source_session,
            source_type: memory.source_type,
            confidence: memory.confidence,
            created_at: memory.created_at,
            last_accessed_at: memory.last_accessed_at,
            updated_at: memory.updated_at,
            deleted_at: memory.deleted_at,
        }
    }
}

/// One recalled memory with its scores.
#[derive(Debug, Clone, Serialize)]
struct RecallView {
    memory: MemoryView,
    similarity: f32,
    relevance: f32,
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tools/list", get(list_tools))
        .route("/tools/call", post(call_tool))
}

async fn list_tools() -> Json<ListToolsResponse> {
    Json(ListToolsResponse {
        tools: available_tools(),
    })
}

async fn call_tool(
    State(state): State<AppState>,
    Json(request): Json<CallToolRequest>,
) -> ApiResult<Json<JsonValue>> {
    // The router's tower timeout is the hard cutoff at the same duration;
    // this deadline is the cooperative signal blocking operations poll.
    let deadline = Deadline::after(state.call_timeout);
    let arguments = if request.arguments.is_null() {
        json!({})
    } else {
        request.arguments
    };

    match dispatch(&state, &request.name, arguments, deadline).await {
        Ok(value) => Ok(Json(value)),
        Err(err) => {
            log_tool_error(&state, &request.name, &err).await;
            Err(err)
        }
    }
}

/// Best-effort append to the tool-error log; never fails the response.
async fn log_tool_error(state: &AppState, tool: &str, err: &ApiError) {
    let row = ToolErrorRow {
        tool: tool.to_string(),
        code: err.code.to_string(),
        message: err.message.clone(),
        occurred_at: Utc::now(),
    };
    if let Err(log_err) = state.store.tool_error_insert(&row, Deadline::none()).await {
        tracing::debug!(error = %log_err, "Tool-error log append failed");
    }
}

// ============================================================================
// ARGUMENT TYPES
// ============================================================================

fn default_relevance() -> f32 {
    0.5
}

fn default_content_type() -> ContentType {
    ContentType::Message
}

fn default_true() -> bool {
    true
}

fn default_recall_limit() -> usize {
    10
}

fn default_recent_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
struct InitSessionArgs {
    session_id: String,
    user_id: String,
    org_id: Option<String>,
    max_tokens: Option<i32>,
    ttl_seconds: Option<i64>,
    config: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct AddToWorkingMemoryArgs {
    session_id: String,
    user_id: String,
    content: String,
    #[serde(default = "default_content_type")]
    content_type: ContentType,
    #[serde(default = "default_relevance")]
    relevance: f32,
    #[serde(default)]
    pinned: bool,
}

#[derive(Debug, Deserialize)]
struct GetWorkingMemoryArgs {
    session_id: String,
    token_budget: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct UpdateWorkingMemoryItemArgs {
    session_id: String,
    item_id: ItemId,
    pinned: Option<bool>,
    relevance: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ClearWorkingMemoryArgs {
    session_id: String,
    #[serde(default = "default_true")]
    checkpoint_first: bool,
}

#[derive(Debug, Deserialize)]
struct StoreMemoryArgs {
    user_id: String,
    content: String,
    category: Option<MemoryCategory>,
    subtype: Option<MemorySubtype>,
    importance: Option<f32>,
    entities: Option<Vec<String>>,
    metadata: Option<JsonValue>,
    event_at: Option<Timestamp>,
    is_temporal: Option<bool>,
    summary: Option<String>,
    confidence: Option<f32>,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecallMemoriesArgs {
    user_id: String,
    query: String,
    #[serde(default = "default_recall_limit")]
    limit: usize,
    min_similarity: Option<f32>,
    categories: Option<Vec<MemoryCategory>>,
    subtypes: Option<Vec<MemorySubtype>>,
    entities: Option<Vec<String>>,
    event_after: Option<Timestamp>,
    event_before: Option<Timestamp>,
    confidence_floor: Option<f32>,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateMemoryArgs {
    user_id: String,
    memory_id: MemoryId,
    content: Option<String>,
    summary: Option<String>,
    importance: Option<f32>,
    confidence: Option<f32>,
    metadata: Option<JsonValue>,
    entities: Option<Vec<String>>,
    event_at: Option<Timestamp>,
    is_temporal: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ForgetMemoryArgs {
    user_id: String,
    memory_id: MemoryId,
    #[serde(default)]
    hard: bool,
}

#[derive(Debug, Deserialize)]
struct ForgetAllArgs {
    user_id: String,
    #[serde(default)]
    confirmation: String,
}

#[derive(Debug, Deserialize)]
struct GetRelevantContextArgs {
    session_id: String,
    user_id: String,
    query: String,
    token_budget: Option<i32>,
    /// Intent hint; an unrecognized value falls back to detection
    intent: Option<String>,
    #[serde(default)]
    focus_entities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CheckpointArgs {
    session_id: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GetRecentCallsArgs {
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct GetMemoryAnalyticsArgs {
    user_id: String,
}

// ============================================================================
// DISPATCH
// ============================================================================

fn parse_args<T: DeserializeOwned>(tool: &str, args: JsonValue) -> ApiResult<T> {
    serde_json::from_value(args)
        .map_err(|e| ApiError::validation(format!("Invalid arguments for '{}': {}", tool, e)))
}

pub(crate) async fn dispatch(
    state: &AppState,
    name: &str,
    args: JsonValue,
    deadline: Deadline,
) -> ApiResult<JsonValue> {
    match name {
        // ====================================================================
        // Working memory
        // ====================================================================
        "init_session" => {
            let args: InitSessionArgs = parse_args(name, args)?;
            let session = state
                .working
                .init_session(
                    &SessionKey::new(args.session_id),
                    &UserId::new(args.user_id),
                    SessionOptions {
                        org_id: args.org_id,
                        max_tokens: args.max_tokens,
                        ttl_seconds: args.ttl_seconds,
                        config: args.config,
                    },
                    deadline,
                )
                .await?;
            Ok(serde_json::to_value(session)?)
        }

        "add_to_working_memory" => {
            let args: AddToWorkingMemoryArgs = parse_args(name, args)?;
            let outcome = state
                .working
                .append(
                    &SessionKey::new(args.session_id),
                    &UserId::new(args.user_id),
                    AppendRequest {
                        content: args.content,
                        content_type: args.content_type,
                        relevance: args.relevance,
                        pinned: args.pinned,
                    },
                    deadline,
                )
                .await?;
            Ok(serde_json::to_value(outcome)?)
        }

        "get_working_memory" => {
            let args: GetWorkingMemoryArgs = parse_args(name, args)?;
            let items = state
                .working
                .get_items(&SessionKey::new(args.session_id), args.token_budget, deadline)
                .await?;
            let total_tokens: i32 = items.iter().map(|item| item.token_count).sum();
            Ok(json!({
                "items": items,
                "total_tokens": total_tokens,
            }))
        }

        "update_working_memory_item" => {
            let args: UpdateWorkingMemoryItemArgs = parse_args(name, args)?;
            let item: WorkingItem = state
                .working
                .update_item(
                    &SessionKey::new(args.session_id),
                    args.item_id,
                    args.pinned,
                    args.relevance,
                    deadline,
                )
                .await?;
            Ok(serde_json::to_value(item)?)
        }

        "clear_working_memory" => {
            let args: ClearWorkingMemoryArgs = parse_args(name, args)?;
            let outcome = state
                .working
                .clear_session(&SessionKey::new(args.session_id), args.checkpoint_first, deadline)
                .await?;
            Ok(serde_json::to_value(outcome)?)
        }

        // ====================================================================
        // Long-term memory
        // ====================================================================
        "store_memory" => {
            let args: StoreMemoryArgs = parse_args(name, args)?;
            let outcome = state
                .longterm
                .store(
                    &UserId::new(args.user_id),
                    StoreMemoryRequest {
                        content: args.content,
                        category: args.category,
                        subtype: args.subtype,
                        importance: args.importance,
                        entities: args.entities,
                        metadata: args.metadata,
                        event_at: args.event_at,
                        is_temporal: args.is_temporal,
                        summary: args.summary,
                        confidence: args.confidence,
                        source_session: args.session_id.map(SessionKey::new),
                        source_type: SourceType::Explicit,
                    },
                    deadline,
                )
                .await?;
            Ok(serde_json::to_value(outcome)?)
        }

        "recall_memories" => {
            let args: RecallMemoriesArgs = parse_args(name, args)?;
            let filter = RecallFilter {
                categories: args.categories,
                subtypes: args.subtypes,
                entities: args.entities,
                event_after: args.event_after,
                event_before: args.event_before,
                confidence_floor: args.confidence_floor,
            };
            let results = state
                .longterm
                .recall(
                    &UserId::new(args.user_id),
                    &args.query,
                    filter,
                    args.limit,
                    args.min_similarity,
                    args.session_id.map(SessionKey::new),
                    deadline,
                )
                .await?;
            let memories: Vec<RecallView> = results
                .into_iter()
                .map(|recalled| RecallView {
                    similarity: recalled.similarity,
                    relevance: recalled.relevance,
                    memory: recalled.memory.into(),
                })
                .collect();
            Ok(json!({
                "count": memories.len(),
                "memories": memories,
            }))
        }

        "update_memory" => {
            let args: UpdateMemoryArgs = parse_args(name, args)?;
            let memory = state
                .longterm
                .update(
                    &UserId::new(args.user_id),
                    args.memory_id,
                    UpdateMemoryRequest {
                        content: args.content,
                        summary: args.summary,
                        importance: args.importance,
                        confidence: args.confidence,
                        metadata: args.metadata,
                        entities: args.entities,
                        event_at: args.event_at,
                        is_temporal: args.is_temporal,
                    },
                    deadline,
                )
                .await?;
            Ok(serde_json::to_value(MemoryView::from(memory))?)
        }

        "forget_memory" => {
            let args: ForgetMemoryArgs = parse_args(name, args)?;
            state
                .longterm
                .forget(&UserId::new(args.user_id), args.memory_id, args.hard, deadline)
                .await?;
            Ok(json!({
                "forgotten": true,
                "hard": args.hard,
            }))
        }

        "forget_all_user_memories" => {
            let args: ForgetAllArgs = parse_args(name, args)?;
            let removed = state
                .longterm
                .forget_all(&UserId::new(args.user_id), &args.confirmation, deadline)
                .await?;
            Ok(json!({ "removed": removed }))
        }

        // ====================================================================
        // Context
        // ====================================================================
        "get_relevant_context" => {
            let args: GetRelevantContextArgs = parse_args(name, args)?;
            let intent = args
                .intent
                .as_deref()
                .and_then(|hint| hint.parse::<Intent>().ok());
            let context = state
                .assembler
                .assemble(
                    ContextRequest {
                        session_key: SessionKey::new(args.session_id),
                        user_id: UserId::new(args.user_id),
                        query: args.query,
                        token_budget: args
                            .token_budget
                            .unwrap_or(state.context_default_budget),
                        intent,
                        focus_entities: args.focus_entities,
                    },
                    deadline,
                )
                .await?;
            Ok(serde_json::to_value(context)?)
        }

        "checkpoint_working_memory" => {
            let args: CheckpointArgs = parse_args(name, args)?;
            let promoted = state
                .working
                .checkpoint(&SessionKey::new(args.session_id), deadline)
                .await?;
            Ok(json!({ "promoted": promoted }))
        }

        // ====================================================================
        // Analytics
        // ====================================================================
        "get_stats" => {
            let totals = state.model.metrics().totals();
            let cache = state.model.cache_stats();
            let store_healthy = state.store.ping().await.is_ok();
            let pool = state.pg.as_ref().map(|pg| {
                let (size, available) = pg.pool_status();
                json!({ "size": size, "available": available })
            });
            let hit_rate = if cache.hits + cache.misses > 0 {
                cache.hits as f64 / (cache.hits + cache.misses) as f64
            } else {
                0.0
            };
            Ok(json!({
                "uptime_seconds": state.start_time.elapsed().as_secs(),
                "store_healthy": store_healthy,
                "pool": pool,
                "model_calls": totals,
                "embedding_cache": {
                    "size": cache.size,
                    "capacity": cache.capacity,
                    "hits": cache.hits,
                    "misses": cache.misses,
                    "hit_rate": hit_rate,
                },
            }))
        }

        "get_recent_calls" => {
            let args: GetRecentCallsArgs = parse_args(name, args)?;
            let limit = if args.limit == 0 {
                default_recent_limit()
            } else {
                args.limit
            };
            let calls = state.model.metrics().recent(limit);
            Ok(json!({ "calls": calls }))
        }

        "get_memory_analytics" => {
            let args: GetMemoryAnalyticsArgs = parse_args(name, args)?;
            let user = UserId::new(args.user_id);
            let report = state.longterm.quality_report(&user, deadline).await?;
            let recent_access = state
                .store
                .access_log_for_user(&user, 20, deadline)
                .await?;
            Ok(json!({
                "report": report,
                "recent_access": recent_access,
            }))
        }

        _ => Err(ApiError::not_found(format!("Unknown tool '{}'", name))),
    }
}

// ============================================================================
// TOOL DEFINITIONS
// ============================================================================

fn available_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "init_session".to_string(),
            description: "Initialize or resume a working-memory session".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string", "description": "Opaque session key"},
                    "user_id": {"type": "string", "description": "Owning user"},
                    "org_id": {"type": "string"},
                    "max_tokens": {"type": "integer", "description": "Token capacity (default 8000)"},
                    "ttl_seconds": {"type": "integer", "description": "Session expiry, seconds from now"},
                    "config": {"type": "object", "description": "Opaque configuration blob"}
                },
                "required": ["session_id", "user_id"]
            }),
        },
        Tool {
            name: "add_to_working_memory".to_string(),
            description: "Append an item to a session's working memory; evicts under capacity pressure".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "user_id": {"type": "string"},
                    "content": {"type": "string"},
                    "content_type": {
                        "type": "string",
                        "enum": ["message", "task_state", "scratchpad", "system", "retrieved_memory"]
                    },
                    "relevance": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "pinned": {"type": "boolean", "description": "Protect from eviction"}
                },
                "required": ["session_id", "user_id", "content"]
            }),
        },
        Tool {
            name: "get_working_memory".to_string(),
            description: "Read a session's items, optionally filled to a token budget".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "token_budget": {"type": "integer"}
                },
                "required": ["session_id"]
            }),
        },
        Tool {
            name: "update_working_memory_item".to_string(),
            description: "Update an item's pinned flag or relevance score".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "item_id": {"type": "string", "format": "uuid"},
                    "pinned": {"type": "boolean"},
                    "relevance": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                },
                "required": ["session_id", "item_id"]
            }),
        },
        Tool {
            name: "clear_working_memory".to_string(),
            description: "Clear a session, optionally promoting relevant items to long-term first".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "checkpoint_first": {"type": "boolean", "description": "Promote before deleting (default true)"}
                },
                "required": ["session_id"]
            }),
        },
        Tool {
            name: "store_memory".to_string(),
            description: "Store a long-term memory; classifies automatically and merges near-duplicates".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "string"},
                    "content": {"type": "string"},
                    "category": {"type": "string", "enum": ["episodic", "semantic", "procedural", "preference"]},
                    "subtype": {"type": "string"},
                    "importance": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "entities": {"type": "array", "items": {"type": "string"}},
                    "metadata": {"type": "object"},
                    "event_at": {"type": "string", "format": "date-time"},
                    "is_temporal": {"type": "boolean"},
                    "summary": {"type": "string"},
                    "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "session_id": {"type": "string", "description": "Source session"}
                },
                "required": ["user_id", "content"]
            }),
        },
        Tool {
            name: "recall_memories".to_string(),
            description: "Semantic recall ranked by composite relevance".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "string"},
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "description": "Default 10"},
                    "min_similarity": {"type": "number", "description": "Cosine floor (default 0.7)"},
                    "categories": {"type": "array", "items": {"type": "string"}},
                    "subtypes": {"type": "array", "items": {"type": "string"}},
                    "entities": {"type": "array", "items": {"type": "string"}},
                    "event_after": {"type": "string", "format": "date-time"},
                    "event_before": {"type": "string", "format": "date-time"},
                    "confidence_floor": {"type": "number"},
                    "session_id": {"type": "string"}
                },
                "required": ["user_id", "query"]
            }),
        },
        Tool {
            name: "update_memory".to_string(),
            description: "Update a memory; content changes re-embed, metadata merges".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "string"},
                    "memory_id": {"type": "string", "format": "uuid"},
                    "content": {"type": "string"},
                    "summary": {"type": "string"},
                    "importance": {"type": "number"},
                    "confidence": {"type": "number"},
                    "metadata": {"type": "object"},
                    "entities": {"type": "array", "items": {"type": "string"}},
                    "event_at": {"type": "string", "format": "date-time"},
                    "is_temporal": {"type": "boolean"}
                },
                "required": ["user_id", "memory_id"]
            }),
        },
        Tool {
            name: "forget_memory".to_string(),
            description: "Forget a memory (soft by default, hard removes the row)".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "string"},
                    "memory_id": {"type": "string", "format": "uuid"},
                    "hard": {"type": "boolean", "description": "Hard-delete (default false)"}
                },
                "required": ["user_id", "memory_id"]
            }),
        },
        Tool {
            name: "forget_all_user_memories".to_string(),
            description: "Erase every memory of a user; requires confirmation token CONFIRM_DELETE_ALL".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "string"},
                    "confirmation": {"type": "string", "description": "Must equal CONFIRM_DELETE_ALL"}
                },
                "required": ["user_id", "confirmation"]
            }),
        },
        Tool {
            name: "get_relevant_context".to_string(),
            description: "Assemble the most relevant context for a query under a token budget".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "user_id": {"type": "string"},
                    "query": {"type": "string"},
                    "token_budget": {"type": "integer", "description": "Default 8000"},
                    "intent": {
                        "type": "string",
                        "enum": ["how_to", "what_happened", "what_is", "debug", "general"]
                    },
                    "focus_entities": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["session_id", "user_id", "query"]
            }),
        },
        Tool {
            name: "checkpoint_working_memory".to_string(),
            description: "Promote relevant working-memory items to long-term without clearing".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"}
                },
                "required": ["session_id"]
            }),
        },
        Tool {
            name: "get_stats".to_string(),
            description: "Service statistics: uptime, model-call totals, cache and pool state".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        Tool {
            name: "get_recent_calls".to_string(),
            description: "Most recent model-gateway calls from the in-process ring buffer".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "Default 50"}
                }
            }),
        },
        Tool {
            name: "get_memory_analytics".to_string(),
            description: "Per-user memory quality report and recent access entries".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "string"}
                },
                "required": ["user_id"]
            }),
        },
    ]
}

// ============================================================================
// TESTS
// ============================================================================
