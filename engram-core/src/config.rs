//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vector store backend selector. All backends implement the same contract:
/// row CRUD, serializable writers, and a cosine-similarity primitive over a
/// fixed-dimension embedding column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Firebolt,
    Elastic,
    Clickhouse,
}

/// Weights of the composite relevance score used during recall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceWeights {
    pub semantic: f32,
    pub recency: f32,
    pub frequency: f32,
    pub importance: f32,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            recency: 0.2,
            frequency: 0.1,
            importance: 0.2,
        }
    }
}

/// Importance decay applied by the explicit apply-decay operation.
/// Never runs implicitly during a recall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Multiplier applied to importance per pass
    pub rate: f32,
    /// Only memories idle at least this long are decayed
    pub inactive_days: i64,
    /// Importance never decays below this floor
    pub floor: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            rate: 0.98,
            inactive_days: 7,
            floor: 0.1,
        }
    }
}

/// Retry configuration for transient store conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Initial backoff duration in nanoseconds
    pub initial_backoff: Duration,
    /// Maximum backoff duration in nanoseconds
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// Master configuration for the memory core.
/// Secrets arrive only via the configuration channel; no crate below the
/// server binary reads process environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngramConfig {
    /// Embedding dimension D; fixed at index-creation time
    pub dimension: i32,
    /// Vector store backend selector
    pub vector_backend: VectorBackend,

    // Working memory
    /// Default session capacity in tokens
    pub working_memory_capacity: i32,
    /// Evicted items at or above this relevance are promoted to long-term
    pub promotion_threshold: f32,
    /// Checkpoint/clear promote items at or above this relevance
    pub checkpoint_relevance_floor: f32,

    // Retrieval
    /// Minimum cosine similarity for recall
    pub recall_similarity_floor: f32,
    /// Minimum cosine similarity to treat a store as a duplicate
    pub dedup_similarity_floor: f32,
    /// Minimum cosine similarity to flag a contradiction candidate
    pub contradiction_similarity_floor: f32,
    /// Half-life of the recency term, in days
    pub recency_half_life_days: f32,
    /// Saturation point of the frequency term
    pub access_count_cap: i32,
    pub relevance_weights: RelevanceWeights,

    // Context assembly
    /// Sub-budgets smaller than this are skipped
    pub min_slot_budget: i32,
    /// Candidates fetched per (category, subtype) slot
    pub candidates_per_slot: usize,
    /// Per-matching-entity score multiplier increment
    pub entity_boost: f32,

    pub decay: DecayConfig,
    pub store_retry: RetryConfig,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            dimension: 768,
            vector_backend: VectorBackend::default(),
            working_memory_capacity: 8000,
            promotion_threshold: 0.6,
            checkpoint_relevance_floor: 0.5,
            recall_similarity_floor: 0.7,
            dedup_similarity_floor: 0.95,
            contradiction_similarity_floor: 0.75,
            recency_half_life_days: 30.0,
            access_count_cap: 100,
            relevance_weights: RelevanceWeights::default(),
            min_slot_budget: 50,
            candidates_per_slot: 5,
            entity_boost: 0.3,
            decay: DecayConfig::default(),
            store_retry: RetryConfig::default(),
        }
    }
}

impl EngramConfig {
    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(ConfigError) if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "dimension".to_string(),
                value: self.dimension.to_string(),
                reason: "dimension must be greater than 0".to_string(),
            });
        }

        if self.working_memory_capacity <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "working_memory_capacity".to_string(),
                value: self.working_memory_capacity.to_string(),
                reason: "working_memory_capacity must be greater than 0".to_string(),
            });
        }

        for (field, value) in [
            ("promotion_threshold", self.promotion_threshold),
            ("checkpoint_relevance_floor", self.checkpoint_relevance_floor),
            ("dedup_similarity_floor", self.dedup_similarity_floor),
            (
                "contradiction_similarity_floor",
                self.contradiction_similarity_floor,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be between 0.0 and 1.0".to_string(),
                });
            }
        }

        // Recall floor is a cosine similarity, so the legal range is wider.
        if !(-1.0..=1.0).contains(&self.recall_similarity_floor) {
            return Err(ConfigError::InvalidValue {
                field: "recall_similarity_floor".to_string(),
                value: self.recall_similarity_floor.to_string(),
                reason: "must be between -1.0 and 1.0".to_string(),
            });
        }

        if self.recency_half_life_days <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "recency_half_life_days".to_string(),
                value: self.recency_half_life_days.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if self.access_count_cap <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "access_count_cap".to_string(),
                value: self.access_count_cap.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let w = &self.relevance_weights;
        for (field, value) in [
            ("relevance_weights.semantic", w.semantic),
            ("relevance_weights.recency", w.recency),
            ("relevance_weights.frequency", w.frequency),
            ("relevance_weights.importance", w.importance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be between 0.0 and 1.0".to_string(),
                });
            }
        }

        if !(0.0 < self.decay.rate && self.decay.rate <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "decay.rate".to_string(),
                value: self.decay.rate.to_string(),
                reason: "must be in (0.0, 1.0]".to_string(),
            });
        }

        if self.decay.inactive_days < 0 {
            return Err(ConfigError::InvalidValue {
                field: "decay.inactive_days".to_string(),
                value: self.decay.inactive_days.to_string(),
                reason: "must be non-negative".to_string(),
            });
        }

        if self.store_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store_retry.max_attempts".to_string(),
                value: self.store_retry.max_attempts.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.store_retry.backoff_multiplier <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "store_retry.backoff_multiplier".to_string(),
                value: self.store_retry.backoff_multiplier.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngramConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_dimension_rejected() {
        let config = EngramConfig {
            dimension: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = EngramConfig {
            dedup_similarity_floor: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_decay_rate_zero_rejected() {
        let mut config = EngramConfig::default();
        config.decay.rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_match_contract() {
        let config = EngramConfig::default();
        assert_eq!(config.dimension, 768);
        assert_eq!(config.working_memory_capacity, 8000);
        assert_eq!(config.recall_similarity_floor, 0.7);
        assert_eq!(config.dedup_similarity_floor, 0.95);
        assert_eq!(config.contradiction_similarity_floor, 0.75);
        assert_eq!(config.store_retry.max_attempts, 5);
        assert_eq!(config.store_retry.initial_backoff, Duration::from_millis(50));
        assert_eq!(config.store_retry.max_backoff, Duration::from_secs(1));
    }
}
