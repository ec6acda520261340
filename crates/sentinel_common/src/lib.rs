//! Shared library for the sentinel daemon and CLI: data model,
//! configuration, control-socket protocol, and SQLite storage.

pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod types;

pub use config::SentinelConfig;
pub use control::{ControlRequest, ControlResponse, DaemonStatus, FailureSummary};
pub use db::{AgentEvent, MetaLogEntry, SentinelDb};
pub use error::{RestartError, StorageError};
pub use types::{
    BreakerMode, CheckFailure, CheckKind, CollectionSnapshot, CombinedDiagnostics,
    FailureRecord, FailureType, HealthCheckSummary, HealthStatus, ProbeErrorKind,
    ProbeKind, ProbeResult,
};
