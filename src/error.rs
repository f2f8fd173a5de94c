//! Error types for attendance aggregation and access control

use std::fmt;

use thiserror::Error;

/// Why a request was turned away by the authorization gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No session role was present on a non-public path.
    Unauthenticated,
    /// A role was present but its inherited prefixes do not cover the path.
    InsufficientRole,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Unauthenticated => f.write_str("unauthenticated"),
            DenyReason::InsufficientRole => f.write_str("insufficient role"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("access denied to {path} for role {}: {reason}", .role.as_deref().unwrap_or("<none>"))]
    AccessDenied {
        path: String,
        role: Option<String>,
        reason: DenyReason,
    },

    #[error("batch of {attempted} attendance rows rolled back: {reason}")]
    PartialBatchFailure { attempted: usize, reason: String },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("leave application {id} is already {status}")]
    InvalidTransition { id: String, status: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for AttendanceError {
    fn from(err: sqlx::Error) -> Self {
        AttendanceError::StoreUnavailable(err.to_string())
    }
}

pub type AttendanceResult<T> = Result<T, AttendanceError>;
