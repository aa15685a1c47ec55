// ── Core error types ──
//
// Errors surfaced by the coordination core. Storage, auth and worker
// failures have their own enums; `CoreError` wraps them for callers that
// cross component boundaries (HTTP layer, boot sequence, restore).

use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::service::WorkerError;
use crate::storage::StorageError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    // ── Component errors ─────────────────────────────────────────────
    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    // ── Backup / restore ─────────────────────────────────────────────
    #[error("A backup is already running")]
    BackupRunning,

    #[error("A restore is already running")]
    RestoreRunning,

    /// Raised for any failure after the database was cleared. The process
    /// cannot continue with a half-loaded store.
    #[error("Restore failed after the database was cleared: {message}")]
    RestoreFatal { message: String },

    // ── I/O and encoding ─────────────────────────────────────────────
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation failed: {message}")]
    OperationFailed { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// HTTP status code the API boundary should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::ValidationFailed { .. } => 400,
            Self::Conflict { .. } | Self::BackupRunning | Self::RestoreRunning => 409,
            Self::Auth(AuthError::Unauthorized) => 401,
            Self::Storage(err) => match err {
                StorageError::NoDocuments { .. } => 404,
                StorageError::Conflict { .. } => 409,
                StorageError::InvalidFilter { .. } => 400,
                _ => 500,
            },
            _ => 500,
        }
    }

    /// True when the underlying cause is a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Storage(StorageError::NoDocuments { .. })
        )
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { collection, id } => Self::Conflict {
                message: format!("{collection} with id '{id}' already exists"),
            },
            other => Self::Storage(other),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ── HTTP envelope ───────────────────────────────────────────────────

/// JSON body returned by the API boundary on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(err: &CoreError) -> Self {
        // Auth failures share one message so callers cannot tell them apart.
        let message = match err {
            CoreError::Auth(_) => "unauthorized".to_owned(),
            other => other.to_string(),
        };
        Self {
            success: false,
            message,
        }
    }
}
