//! Error taxonomy shared across the workspace
//!
//! Low-level components return their narrowest kind; the engine only ever
//! attaches context, never changes a kind. Retry decisions key off
//! `is_retryable`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::Conflict;

/// One structured validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("network error: {message}")]
    Network {
        retryable: bool,
        status: Option<u16>,
        message: String,
    },

    #[error("authentication failed: {message}")]
    Auth {
        requires_refresh: bool,
        message: String,
    },

    #[error("{} conflicts require manual resolution", .conflicts.len())]
    Conflict { conflicts: Vec<Conflict> },

    #[error("quota exceeded: {used} used of {limit}")]
    Quota { limit: u64, used: u64 },

    #[error("validation error: {message}")]
    Validation {
        field: Option<String>,
        details: Vec<ValidationIssue>,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Transport-level failure worth retrying.
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network {
            retryable: true,
            status: None,
            message: message.into(),
        }
    }

    /// HTTP failure; 5xx responses are retryable, other statuses are not.
    pub fn network_status(status: u16, message: impl Into<String>) -> Self {
        SyncError::Network {
            retryable: status >= 500,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        SyncError::Auth {
            requires_refresh: false,
            message: message.into(),
        }
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        SyncError::Auth {
            requires_refresh: true,
            message: message.into(),
        }
    }

    pub fn conflicts(conflicts: Vec<Conflict>) -> Self {
        SyncError::Conflict { conflicts }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation {
            field: None,
            details: Vec::new(),
            message: message.into(),
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let message = message.into();
        SyncError::Validation {
            details: vec![ValidationIssue {
                path: field.clone(),
                message: message.clone(),
            }],
            field: Some(field),
            message,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        SyncError::Storage(message.into())
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        SyncError::Unknown(message.into())
    }

    /// Whether the retry layer may re-attempt the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Auth {
                requires_refresh, ..
            } => *requires_refresh,
            _ => false,
        }
    }

    /// Short kind tag, stable across messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Network { .. } => "network",
            SyncError::Auth { .. } => "auth",
            SyncError::Conflict { .. } => "conflict",
            SyncError::Quota { .. } => "quota",
            SyncError::Validation { .. } => "validation",
            SyncError::Storage(_) => "storage",
            SyncError::Unknown(_) => "unknown",
        }
    }

    /// Prefix operational context onto the message, preserving the kind and
    /// every structured field.
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            SyncError::Network {
                retryable,
                status,
                message,
            } => SyncError::Network {
                retryable,
                status,
                message: format!("{ctx}: {message}"),
            },
            SyncError::Auth {
                requires_refresh,
                message,
            } => SyncError::Auth {
                requires_refresh,
                message: format!("{ctx}: {message}"),
            },
            SyncError::Validation {
                field,
                details,
                message,
            } => SyncError::Validation {
                field,
                details,
                message: format!("{ctx}: {message}"),
            },
            SyncError::Storage(message) => SyncError::Storage(format!("{ctx}: {message}")),
            SyncError::Unknown(message) => SyncError::Unknown(format!("{ctx}: {message}")),
            other => other,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::validation(format!("decode error: {e}"))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}
