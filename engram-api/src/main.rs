//! Engram API Server Entry Point
//!
//! Bootstraps configuration from the environment, verifies the store
//! schema (tables and the vector index must exist before the first
//! insert), and starts the Axum HTTP server with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use engram_api::jobs::{flush_metrics, spawn_metrics_flush};
use engram_api::{create_router, ApiConfig, ApiError, ApiResult, AppState};
use engram_llm::{ModelGateway, OpenAiChatProvider, OpenAiClient, OpenAiEmbeddingProvider};
use engram_storage::{PgStore, StoreGateway};

#[tokio::main]
async fn main() -> ApiResult<()> {
    engram_api::telemetry::init_tracing();

    let config = ApiConfig::from_env();
    config
        .engram
        .validate()
        .map_err(|e| ApiError::internal(format!("Invalid configuration: {}", e)))?;

    // Store: pool, schema, vector index. Dimension D is fixed here; the
    // index must exist before the first insertion.
    let pg = Arc::new(
        PgStore::from_config(&config.db, config.engram.dimension)
            .map_err(|e| ApiError::internal(format!("Failed to build store: {}", e)))?,
    );
    pg.ensure_schema()
        .await
        .map_err(|e| ApiError::internal(format!("Schema bootstrap failed: {}", e)))?;
    let store = Arc::new(StoreGateway::new(
        Arc::clone(&pg) as Arc<dyn engram_storage::StoreBackend>,
        config.engram.store_retry.clone(),
    ));

    // Model gateway over the configured OpenAI-compatible service.
    let client = Arc::new(
        OpenAiClient::new(config.model_base_url.clone(), config.model_api_key.clone())
            .map_err(|e| ApiError::internal(format!("Failed to build model client: {}", e)))?,
    );
    let model = Arc::new(ModelGateway::new(
        Arc::new(OpenAiEmbeddingProvider::new(
            Arc::clone(&client),
            config.embedding_model.clone(),
            config.engram.dimension,
        )),
        Arc::new(OpenAiChatProvider::new(client, config.chat_model.clone())),
    ));

    let state = AppState::build(
        store,
        model,
        Arc::new(config.engram.clone()),
        &config,
        Some(pg),
    );

    let flush_job = spawn_metrics_flush(state.clone(), config.metrics_flush_interval);

    let app = create_router(state.clone());
    let addr = resolve_bind_addr(&config)?;
    tracing::info!(%addr, "Starting Engram API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    // Final flush before the job dies with the process.
    flush_job.abort();
    flush_metrics(&state).await;
    Ok(())
}

fn resolve_bind_addr(config: &ApiConfig) -> ApiResult<SocketAddr> {
    let addr = format!("{}:{}", config.host, config.port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::validation(format!("Invalid bind address {}: {}", addr, e)))
}
