use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed-set error taxonomy. Every public operation returns this type;
/// nothing below it (IO, serialization, signature plumbing) is allowed to
/// bubble a transport-level exception past an operation boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("forbidden: {reason}")]
    Forbidden {
        reason: String,
        code: Option<String>,
    },

    #[error("insufficient scope: missing {missing:?}")]
    InsufficientScope { missing: Vec<String> },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("schema invalid: {message}")]
    SchemaInvalid { message: String },

    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("idempotency key reuse with mismatched payload")]
    IdempotencyKeyReusePayloadMismatch {
        stored_hash: String,
        given_hash: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Unauthorized { .. } => "UNAUTHORIZED",
            EngineError::Forbidden { .. } => "FORBIDDEN",
            EngineError::InsufficientScope { .. } => "INSUFFICIENT_SCOPE",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::SchemaInvalid { .. } => "SCHEMA_INVALID",
            EngineError::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::IdempotencyKeyReusePayloadMismatch { .. } => {
                "IDEMPOTENCY_KEY_REUSE_PAYLOAD_MISMATCH"
            }
            EngineError::Internal(_) => "INTERNAL",
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        EngineError::Forbidden {
            reason: reason.into(),
            code: None,
        }
    }

    pub fn forbidden_with_code(reason: impl Into<String>, code: impl Into<String>) -> Self {
        EngineError::Forbidden {
            reason: reason.into(),
            code: Some(code.into()),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict {
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        EngineError::Conflict {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound { what: what.into() }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        EngineError::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Wire representation of the error, as it would be embedded in an
    /// error response envelope (`{correlation_id, error: {code, message, details}}`).
    pub fn to_wire(&self) -> WireError {
        let details = match self {
            EngineError::Forbidden { code, .. } => {
                code.as_ref().map(|c| serde_json::json!({ "reason_code": c }))
            }
            EngineError::Conflict { details, .. } => details.clone(),
            EngineError::InsufficientScope { missing } => {
                Some(serde_json::json!({ "missing_scopes": missing }))
            }
            EngineError::IdempotencyKeyReusePayloadMismatch {
                stored_hash,
                given_hash,
            } => Some(serde_json::json!({
                "stored_hash": stored_hash,
                "given_hash": given_hash,
            })),
            _ => None,
        };
        WireError {
            code: self.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub type EngineResult<T> = Result<T, EngineError>;
