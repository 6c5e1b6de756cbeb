//! Engram API - HTTP tool surface
//!
//! Exposes the memory core's fifteen operations as JSON tool calls over
//! axum, plus a health route. Composition of the component graph lives in
//! [`AppState::build`]; the binary in `main.rs` wires configuration,
//! telemetry, the Postgres store, and graceful shutdown around it.

pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use state::AppState;

use axum::error_handling::HandleErrorLayer;
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// In-flight request ceiling. Parallelism on the write path is bounded by
/// the single-writer store anyway; this keeps the queue from growing
/// without bound ahead of it.
const MAX_IN_FLIGHT_REQUESTS: usize = 64;

/// Build the full API router over the given state.
///
/// The tower timeout is the hard per-request cutoff; inside it, each tool
/// call still carries a [`engram_core::Deadline`] of the same duration
/// that blocking operations poll cooperatively.
pub fn create_router(state: AppState) -> Router {
    let call_timeout = state.call_timeout;
    Router::new()
        .merge(routes::tools::router())
        .merge(routes::health::router())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(call_timeout))
                .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT_REQUESTS)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map middleware failures onto the stable error object.
async fn handle_middleware_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::timeout("request")
    } else {
        tracing::error!(error = %err, "Middleware failure");
        ApiError::internal("Request processing failed")
    }
}
