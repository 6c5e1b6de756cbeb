//! Background jobs
//!
//! The metrics flush drains the model gateway's pending call records to the
//! service-metrics table on an interval. Everything here is best-effort: a
//! flush failure re-queues the records and logs at debug; it never reaches
//! a user operation.

use engram_core::Deadline;
use engram_llm::ModelCallRecord;
use engram_storage::ServiceMetricRow;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::state::AppState;

fn to_row(record: ModelCallRecord) -> ServiceMetricRow {
    ServiceMetricRow {
        operation: record.operation,
        provider: record.provider,
        latency_ms: record.latency_ms,
        success: record.success,
        input_tokens: record.input_tokens,
        output_tokens: record.output_tokens,
        recorded_at: record.timestamp,
    }
}

/// Flush pending metrics once. Re-queues on failure.
pub async fn flush_metrics(state: &AppState) {
    let metrics = state.model.metrics();
    let pending = metrics.drain_pending();
    if pending.is_empty() {
        return;
    }

    let rows: Vec<ServiceMetricRow> = pending.iter().cloned().map(to_row).collect();
    match state
        .store
        .service_metrics_insert(&rows, Deadline::after(Duration::from_secs(5)))
        .await
    {
        Ok(()) => {
            tracing::debug!(count = rows.len(), "Flushed service metrics");
        }
        Err(e) => {
            tracing::debug!(error = %e, "Service-metrics flush failed; re-queueing");
            metrics.requeue(pending);
        }
    }
}

/// Spawn the periodic flush job. The returned handle is aborted at
/// shutdown after one final flush.
pub fn spawn_metrics_flush(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            flush_metrics(&state).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use engram_core::EngramConfig;
    use engram_llm::{MockChatProvider, MockEmbeddingProvider, ModelGateway};
    use engram_storage::{MockStore, StoreGateway};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_flush_drains_pending_records() {
        let mock = Arc::new(MockStore::new());
        let model = Arc::new(ModelGateway::new(
            Arc::new(MockEmbeddingProvider::new("mock-embed", 8)),
            Arc::new(MockChatProvider::new()),
        ));
        let config = Arc::new(EngramConfig {
            dimension: 8,
            ..Default::default()
        });
        let store = Arc::new(StoreGateway::new(
            Arc::clone(&mock) as Arc<dyn engram_storage::StoreBackend>,
            config.store_retry.clone(),
        ));
        let state = AppState::build(store, model, config, &ApiConfig::default(), None);

        state.model.embed("some text").await.unwrap();
        flush_metrics(&state).await;
        assert_eq!(mock.service_metrics_len(), 1);

        // Nothing left to flush
        flush_metrics(&state).await;
        assert_eq!(mock.service_metrics_len(), 1);
    }
}
