//! Typed errors for the restart executor and the storage layer.
//!
//! Probe failures are not errors here: they are data, absorbed into
//! snapshots as `ProbeErrorKind`. These types cover the two collaborators
//! whose failures the recovery controller has to distinguish.

use thiserror::Error;

/// Failure of a service-restart invocation.
///
/// Terminal for the current recovery attempt only; folded into the
/// `FailureRecord` and the breaker counter, never fatal to the daemon.
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("permission denied restarting unit {unit}")]
    PermissionDenied { unit: String },

    #[error("restart target not found: {unit}")]
    TargetNotFound { unit: String },

    #[error("restart of {unit} failed: {detail}")]
    Failed { unit: String, detail: String },
}

impl RestartError {
    /// Stable string form recorded on failure records and meta-logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "restart_permission_denied",
            Self::TargetNotFound { .. } => "restart_target_not_found",
            Self::Failed { .. } => "restart_failed",
        }
    }
}

/// Storage failure after bounded retries were exhausted.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database write failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
