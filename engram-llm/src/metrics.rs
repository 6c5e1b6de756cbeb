//! Model-call metrics
//!
//! Every gateway call records latency, success, and token counts into a
//! bounded in-process ring buffer. A separate pending queue feeds the
//! best-effort flush into the service-metrics table; a metrics failure never
//! fails the user operation.

use chrono::Utc;
use engram_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// One recorded model-gateway call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCallRecord {
    pub operation: String,
    pub provider: String,
    pub latency_ms: i64,
    pub success: bool,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub timestamp: Timestamp,
}

/// Aggregate totals since process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsTotals {
    pub calls: i64,
    pub failures: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Ring-buffered metrics recorder shared by all gateway calls.
pub struct MetricsRecorder {
    ring: Mutex<VecDeque<ModelCallRecord>>,
    pending: Mutex<Vec<ModelCallRecord>>,
    capacity: usize,
    calls: AtomicI64,
    failures: AtomicI64,
    input_tokens: AtomicI64,
    output_tokens: AtomicI64,
}

impl MetricsRecorder {
    /// Default ring capacity.
    pub const DEFAULT_CAPACITY: usize = 512;

    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            pending: Mutex::new(Vec::new()),
            capacity,
            calls: AtomicI64::new(0),
            failures: AtomicI64::new(0),
            input_tokens: AtomicI64::new(0),
            output_tokens: AtomicI64::new(0),
        }
    }

    /// Record one call. Never fails.
    pub fn record(
        &self,
        operation: &str,
        provider: &str,
        latency_ms: i64,
        success: bool,
        input_tokens: i32,
        output_tokens: i32,
    ) {
        let record = ModelCallRecord {
            operation: operation.to_string(),
            provider: provider.to_string(),
            latency_ms,
            success,
            input_tokens,
            output_tokens,
            timestamp: Utc::now(),
        };

        self.calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.input_tokens
            .fetch_add(input_tokens as i64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(output_tokens as i64, Ordering::Relaxed);

        {
            let mut ring = self.ring.lock().expect("metrics ring poisoned");
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }
        {
            let mut pending = self.pending.lock().expect("metrics pending poisoned");
            // Bound the flush queue too, so a dead store cannot grow it forever
            if pending.len() < self.capacity * 4 {
                pending.push(record);
            }
        }
    }

    /// Most recent calls, newest first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<ModelCallRecord> {
        let ring = self.ring.lock().expect("metrics ring poisoned");
        ring.iter().rev().take(limit).cloned().collect()
    }

    /// Drain records awaiting the best-effort store flush.
    pub fn drain_pending(&self) -> Vec<ModelCallRecord> {
        let mut pending = self.pending.lock().expect("metrics pending poisoned");
        std::mem::take(&mut *pending)
    }

    /// Re-queue records whose flush failed, dropping overflow.
    pub fn requeue(&self, records: Vec<ModelCallRecord>) {
        let mut pending = self.pending.lock().expect("metrics pending poisoned");
        let room = (self.capacity * 4).saturating_sub(pending.len());
        pending.extend(records.into_iter().take(room));
    }

    pub fn totals(&self) -> MetricsTotals {
        MetricsTotals {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let totals = self.totals();
        f.debug_struct("MetricsRecorder")
            .field("capacity", &self.capacity)
            .field("calls", &totals.calls)
            .field("failures", &totals.failures)
            .finish()
    }
}
