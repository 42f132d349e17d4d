//! Error taxonomy shared across the registry crates.
//!
//! This mirrors the error kinds called out by the system design: invalid
//! input, illegal lifecycle transitions, operating against a shut-down
//! store, and the internal/transient failures that never reach a client
//! directly but still need a typed home for logging.

use serde::{Deserialize, Serialize};

/// Application-level error for the registry core.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RegistryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state transition: {from} -> {to}")]
    IllegalStateTransition { from: String, to: String },

    #[error("registry is unavailable: {0}")]
    Unavailable(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::InvalidArgument(_) => "INVALID_ARGUMENT",
            RegistryError::IllegalStateTransition { .. } => "ILLEGAL_STATE_TRANSITION",
            RegistryError::Unavailable(_) => "UNAVAILABLE",
            RegistryError::Transient(_) => "TRANSIENT",
            RegistryError::Internal(_) => "INTERNAL",
        }
    }
}

/// JSON error envelope returned by the transport layer.
///
/// `{code, message, timestamp, path, details}` as called out by the
/// error propagation policy; kept here so every caller (HTTP handlers,
/// tests) builds the same shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub timestamp: String,
    pub path: String,
    pub details: Option<String>,
}

impl ErrorEnvelope {
    pub fn from_error(err: &RegistryError, path: impl Into<String>) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            timestamp: crate::time::format_millis(chrono::Utc::now()),
            path: path.into(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_message() {
        let err = RegistryError::invalid("serviceId is blank");
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert!(err.to_string().contains("serviceId is blank"));
    }

    #[test]
    fn illegal_transition_message() {
        let err = RegistryError::IllegalStateTransition {
            from: "UP".to_string(),
            to: "STARTING".to_string(),
        };
        assert_eq!(err.to_string(), "illegal state transition: UP -> STARTING");
    }

    #[test]
    fn envelope_carries_code_and_path() {
        let err = RegistryError::Unavailable("store shut down".to_string());
        let envelope = ErrorEnvelope::from_error(&err, "/api/v1/services/orders/instances");
        assert_eq!(envelope.code, "UNAVAILABLE");
        assert_eq!(envelope.path, "/api/v1/services/orders/instances");
    }
}
