//! Shared application state for Axum routers.

use crate::config::ApiConfig;
use engram_context::ContextAssembler;
use engram_core::EngramConfig;
use engram_llm::ModelGateway;
use engram_memory::{LongTermMemoryManager, WorkingMemoryManager};
use engram_storage::{PgStore, StoreGateway};
use std::sync::Arc;
use std::time::Instant;

/// Application-wide state shared across all routes. Every component is a
/// constructed instance passed by reference; there is no implicit global
/// state beyond the embedding cache and the metrics ring buffer inside the
/// model gateway.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StoreGateway>,
    pub model: Arc<ModelGateway>,
    pub working: Arc<WorkingMemoryManager>,
    pub longterm: Arc<LongTermMemoryManager>,
    pub assembler: Arc<ContextAssembler>,
    pub config: Arc<EngramConfig>,
    /// Per-call timeout and tool-surface defaults
    pub call_timeout: std::time::Duration,
    pub context_default_budget: i32,
    /// Postgres handle for pool-status health reporting; absent when the
    /// service runs against a non-Postgres backend or in tests
    pub pg: Option<Arc<PgStore>>,
    pub start_time: Instant,
}

impl AppState {
    /// Compose the full component graph over an already-built store
    /// backend and model gateway.
    pub fn build(
        store: Arc<StoreGateway>,
        model: Arc<ModelGateway>,
        config: Arc<EngramConfig>,
        api: &ApiConfig,
        pg: Option<Arc<PgStore>>,
    ) -> Self {
        let longterm = Arc::new(LongTermMemoryManager::new(
            Arc::clone(&store),
            Arc::clone(&model),
            Arc::clone(&config),
        ));
        let working = Arc::new(WorkingMemoryManager::new(
            Arc::clone(&store),
            Arc::clone(&longterm),
            Arc::clone(&model),
            Arc::clone(&config),
        ));
        let assembler = Arc::new(ContextAssembler::new(
            Arc::clone(&working),
            Arc::clone(&longterm),
            Arc::clone(&model),
            Arc::clone(&config),
        ));

        Self {
            store,
            model,
            working,
            longterm,
            assembler,
            config,
            call_timeout: api.call_timeout,
            context_default_budget: api.context_default_budget,
            pg,
            start_time: Instant::now(),
        }
    }
}
