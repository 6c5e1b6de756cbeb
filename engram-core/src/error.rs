//! Error types for Engram operations

use crate::*;
use thiserror::Error;

/// Store gateway errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Serialization conflict: {reason}")]
    Conflict { reason: String },

    #[error("Transient store conflict after {attempts} attempts: {reason}")]
    Transient { attempts: u32, reason: String },

    #[error("Malformed vector in row {id}: expected {expected} components, got {got}")]
    MalformedVector { id: String, expected: i32, got: i32 },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Store backend error: {reason}")]
    Backend { reason: String },

    #[error("Connection pool exhausted")]
    PoolExhausted,
}

/// Model gateway errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Embedding failed: {reason}")]
    EmbeddingFailed { reason: String },

    #[error("Model service unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Subtype {subtype} is not valid for category {category}")]
    InvalidCategoryPair {
        category: MemoryCategory,
        subtype: MemorySubtype,
    },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: i32, got: i32 },

    #[error("Destructive operation requires confirmation token '{expected}'")]
    ConfirmationRequired { expected: &'static str },
}

/// Content security errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Content matched credential patterns: {patterns:?}")]
    CredentialDetected { patterns: Vec<String> },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Backend not supported: {backend}")]
    BackendNotSupported { backend: String },
}

/// Master error type for all Engram errors.
#[derive(Debug, Clone, Error)]
pub enum EngramError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation '{operation}' timed out")]
    Timeout { operation: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl EngramError {
    /// Create an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        EngramError::Internal {
            reason: reason.into(),
        }
    }

    /// Create a timeout error for an operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        EngramError::Timeout {
            operation: operation.into(),
        }
    }

    /// Whether this error represents a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngramError::Store(StoreError::NotFound { .. }))
    }
}

/// Result type alias for Engram operations.
pub type EngramResult<T> = Result<T, EngramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: EngramError = StoreError::PoolExhausted.into();
        assert!(matches!(err, EngramError::Store(_)));

        let err: EngramError = SecurityError::CredentialDetected {
            patterns: vec!["openai_api_key".to_string()],
        }
        .into();
        assert!(matches!(err, EngramError::Security(_)));
    }

    #[test]
    fn test_is_not_found() {
        let err: EngramError = StoreError::NotFound {
            entity_type: EntityType::Memory,
            id: "abc".to_string(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(!EngramError::internal("x").is_not_found());
    }

    #[test]
    fn test_security_error_names_patterns() {
        let err = SecurityError::CredentialDetected {
            patterns: vec!["aws_access_key".to_string(), "pem_private_key".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("aws_access_key"));
        assert!(msg.contains("pem_private_key"));
    }
}
