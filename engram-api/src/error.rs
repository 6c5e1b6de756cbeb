//! Error types for the Engram API
//!
//! Maps the core error taxonomy onto the stable wire shape
//! `{code, message, hint?}` with an HTTP status per code. Messages carry
//! structural information only; nothing user-generated is echoed back.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engram_core::{EngramError, SecurityError, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Stable error codes of the tool surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// The requested session, memory, or user has no record
    NotFound,
    /// Malformed input: unknown taxonomy pair, bad budget, bad vector
    ValidationError,
    /// Content matched a credential pattern
    SecurityViolation,
    /// The store kept conflicting after the retry budget
    TransientStore,
    /// The call deadline elapsed
    Timeout,
    /// The model service failed beyond what fallbacks could rescue
    UpstreamModel,
    /// Every other invariant violation
    Internal,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationError | ErrorCode::SecurityViolation => StatusCode::BAD_REQUEST,
            ErrorCode::TransientStore => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::UpstreamModel => StatusCode::BAD_GATEWAY,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "Entity not found",
            ErrorCode::ValidationError => "Request validation failed",
            ErrorCode::SecurityViolation => "Content matched a credential pattern",
            ErrorCode::TransientStore => "Store temporarily unavailable",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::UpstreamModel => "Model service failed",
            ErrorCode::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NotFound => write!(f, "not-found"),
            ErrorCode::ValidationError => write!(f, "validation-error"),
            ErrorCode::SecurityViolation => write!(f, "security-violation"),
            ErrorCode::TransientStore => write!(f, "transient-store"),
            ErrorCode::Timeout => write!(f, "timeout"),
            ErrorCode::UpstreamModel => write!(f, "upstream-model"),
            ErrorCode::Internal => write!(f, "internal"),
        }
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response returned by every tool operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the failure
    pub code: ErrorCode,

    /// Human-readable message with structural information only
    pub message: String,

    /// Optional remediation hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            hint: None,
        }
    }

    /// Add a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    /// Create a NotFound error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create a ValidationError.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a Timeout error.
    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<EngramError> for ApiError {
    fn from(err: EngramError) -> Self {
        match err {
            EngramError::Store(StoreError::NotFound { entity_type, id }) => {
                ApiError::not_found(format!("{:?} with id {} not found", entity_type, id))
            }
            EngramError::Store(StoreError::Transient { attempts, .. }) => ApiError::new(
                ErrorCode::TransientStore,
                format!("Store conflict persisted across {} attempts", attempts),
            )
            .with_hint("Retry the operation"),
            EngramError::Store(store_err) => {
                tracing::error!(error = %store_err, "Store error");
                ApiError::new(ErrorCode::Internal, "Store operation failed")
            }
            EngramError::Model(model_err) => {
                tracing::error!(error = %model_err, "Model service error");
                ApiError::new(ErrorCode::UpstreamModel, model_err.to_string())
            }
            EngramError::Validation(validation_err) => {
                ApiError::validation(validation_err.to_string())
            }
            EngramError::Security(SecurityError::CredentialDetected { patterns }) => {
                ApiError::new(
                    ErrorCode::SecurityViolation,
                    format!("Content matched credential patterns: {}", patterns.join(", ")),
                )
                .with_hint(
                    "Store a reference to the secret (a vault path or variable name) \
                     instead of the secret itself",
                )
            }
            EngramError::Config(config_err) => {
                tracing::error!(error = %config_err, "Configuration error");
                ApiError::internal("Configuration error")
            }
            EngramError::Timeout { operation } => ApiError::timeout(&operation),
            EngramError::Internal { reason } => {
                tracing::error!(%reason, "Internal error");
                ApiError::internal("Internal error")
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::validation(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::EntityType;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::ValidationError.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::SecurityViolation.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::TransientStore.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorCode::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::UpstreamModel.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ErrorCode::Internal.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_serialization_kebab_case() {
        let err = ApiError::new(ErrorCode::SecurityViolation, "matched");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("security-violation"));
        // Absent hint is omitted entirely
        assert!(!json.contains("hint"));

        let err = err.with_hint("use a reference");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("use a reference"));
    }

    #[test]
    fn test_security_error_conversion_names_patterns() {
        let core_err: EngramError = SecurityError::CredentialDetected {
            patterns: vec!["openai_api_key".to_string(), "jwt_token".to_string()],
        }
        .into();
        let api_err: ApiError = core_err.into();
        assert_eq!(api_err.code, ErrorCode::SecurityViolation);
        assert!(api_err.message.contains("openai_api_key"));
        assert!(api_err.message.contains("jwt_token"));
        assert!(api_err.hint.is_some());
    }

    #[test]
    fn test_not_found_conversion() {
        let core_err: EngramError = StoreError::NotFound {
            entity_type: EntityType::Memory,
            id: "abc".to_string(),
        }
        .into();
        let api_err: ApiError = core_err.into();
        assert_eq!(api_err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_transient_conversion() {
        let core_err: EngramError = StoreError::Transient {
            attempts: 5,
            reason: "serialization".to_string(),
        }
        .into();
        let api_err: ApiError = core_err.into();
        assert_eq!(api_err.code, ErrorCode::TransientStore);
        assert!(api_err.message.contains('5'));
    }
}
