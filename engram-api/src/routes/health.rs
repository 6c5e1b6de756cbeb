//! Health route

use axum::{extract::State, routing::get, Json, Router};
use engram_core::{overall_status, HealthStatus, ModelHealth, StoreHealth};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::state::AppState;

/// Health response for the whole service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub store: StoreHealth,
    pub model: ModelHealth,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let started = Instant::now();
    let mut store = match state.store.ping().await {
        Ok(()) => StoreHealth::reachable(started.elapsed().as_millis() as i64),
        Err(e) => StoreHealth::unreachable(e.to_string()),
    };
    if let Some(pg) = &state.pg {
        let (size, available) = pg.pool_status();
        store = store.with_pool(size, available);
    }

    let totals = state.model.metrics().totals();
    let model = ModelHealth::from_recent_calls(totals.calls, totals.failures);

    Json(HealthResponse {
        status: overall_status(&store, &model),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store,
        model,
    })
}
