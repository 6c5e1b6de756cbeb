//! Health reporting types
//!
//! The health surface reports exactly two components. The store gateway is
//! probed directly and annotated with pool occupancy when a Postgres
//! handle is present. The model gateway is never probed (a probe costs a
//! model call); its health derives from recent call outcomes in the
//! metrics ring buffer.

use serde::{Deserialize, Serialize};

/// Health status for the service or one of its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Operational but impaired
    Degraded,
    /// Not operational
    Unhealthy,
}

/// Store-gateway health: liveness probe result plus pool occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_available: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StoreHealth {
    /// The liveness probe answered.
    pub fn reachable(latency_ms: i64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            pool_size: None,
            pool_available: None,
            message: None,
        }
    }

    /// The liveness probe failed.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            pool_size: None,
            pool_available: None,
            message: Some(message.into()),
        }
    }

    /// Annotate with connection-pool occupancy. A reachable store whose
    /// pool is fully occupied is degraded, not healthy.
    pub fn with_pool(mut self, size: usize, available: usize) -> Self {
        self.pool_size = Some(size);
        self.pool_available = Some(available);
        if self.status == HealthStatus::Healthy && size > 0 && available == 0 {
            self.status = HealthStatus::Degraded;
            self.message = Some("connection pool fully occupied".to_string());
        }
        self
    }
}

/// Model-gateway health derived from recent call outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub status: HealthStatus,
    pub calls: i64,
    pub failures: i64,
}

impl ModelHealth {
    /// A gateway that failed more often than it succeeded over the window
    /// is degraded. One that has not been called yet counts as healthy;
    /// classification fallbacks keep the service usable either way.
    pub fn from_recent_calls(calls: i64, failures: i64) -> Self {
        let status = if calls > 0 && failures * 2 > calls {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            calls,
            failures,
        }
    }
}

/// Overall service status: the store gates hard, the model only degrades.
pub fn overall_status(store: &StoreHealth, model: &ModelHealth) -> HealthStatus {
    if store.status == HealthStatus::Unhealthy {
        HealthStatus::Unhealthy
    } else if store.status == HealthStatus::Degraded || model.status != HealthStatus::Healthy {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
