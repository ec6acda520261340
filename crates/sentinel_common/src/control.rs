//! Control socket protocol between sentinelctl and the daemon.
//!
//! Unix domain socket, one JSON request line, one JSON response line. All
//! state-changing operations (force check, breaker reset, manual restart)
//! travel through this channel into the scheduler loop; nothing outside the
//! loop ever touches breaker or recovery state directly.
//!
//! Socket: /run/sentinel/sentineld.sock (override with $SENTINEL_SOCKET)

use crate::types::{BreakerMode, FailureRecord, HealthCheckSummary, HealthStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Default socket path
pub const SOCKET_PATH: &str = "/run/sentinel/sentineld.sock";

/// Environment variable overriding the socket path
pub const SOCKET_ENV: &str = "SENTINEL_SOCKET";

/// Client-side I/O timeout. Force checks run a full collection pass, so
/// this has to cover a deep probe timeout.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(45);

pub fn socket_path() -> PathBuf {
    std::env::var(SOCKET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(SOCKET_PATH))
}

/// Request submitted into the scheduler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Ping,
    Status,
    /// Immediate routine + deep collection, outside the routine cadence.
    ForceCheck,
    /// Re-arm the restart breaker (manual operator intervention).
    ResetBreaker,
    /// Restart the agent now, bypassing the breaker. Still recorded.
    RestartNow,
    RecentFailures {
        limit: usize,
    },
    /// Generate a report bundle immediately.
    Report,
    /// Stop the daemon after any in-flight recovery finishes.
    Shutdown,
}

/// Daemon status snapshot returned for `Status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub pid: u32,
    pub uptime_secs: u64,
    pub last_status: Option<HealthStatus>,
    pub last_check: Option<DateTime<Utc>>,
    pub checks_run: u64,
    pub breaker_mode: BreakerMode,
    pub consecutive_restart_failures: u32,
    pub restart_failure_threshold: u32,
    pub auto_restart_enabled: bool,
    pub dry_run: bool,
    /// Whether a recovery pass is currently running. The daemon executes
    /// recovery inline in the loop that also answers status requests, so
    /// with the current scheduler this field is always `false` on the
    /// wire; it is carried for clients so the protocol does not change if
    /// recovery ever moves onto its own task.
    pub recovery_in_flight: bool,
}

/// Failure record trimmed for display (full diagnostics stay in the db).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub failure_type: String,
    pub severity: String,
    pub auto_restart_attempted: bool,
    pub restart_successful: Option<bool>,
    pub recovery_timestamp: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl From<&FailureRecord> for FailureSummary {
    fn from(record: &FailureRecord) -> Self {
        Self {
            id: record.id,
            timestamp: record.timestamp,
            failure_type: record.failure_type.as_str().to_string(),
            severity: record.severity.clone(),
            auto_restart_attempted: record.auto_restart_attempted,
            restart_successful: record.restart_successful,
            recovery_timestamp: record.recovery_timestamp,
            notes: record.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Pong,
    Status(DaemonStatus),
    Check {
        status: HealthStatus,
        summary: HealthCheckSummary,
    },
    Ok {
        message: String,
    },
    Failures {
        failures: Vec<FailureSummary>,
    },
    Report {
        path: PathBuf,
    },
    Error {
        message: String,
    },
}

/// Send one request to the daemon and wait for its reply.
pub fn send_request(request: &ControlRequest) -> Result<ControlResponse> {
    let path = socket_path();
    let stream = UnixStream::connect(&path)
        .with_context(|| format!("daemon not reachable at {}", path.display()))?;
    stream.set_read_timeout(Some(CLIENT_TIMEOUT)).ok();
    stream.set_write_timeout(Some(CLIENT_TIMEOUT)).ok();

    let mut writer = stream.try_clone().context("failed to clone socket")?;
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .context("failed to send control request")?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader
        .read_line(&mut response)
        .context("failed to read control response")?;

    serde_json::from_str(&response).context("malformed control response")
}

/// Quick liveness probe used by `sentinelctl` before slower fallbacks.
pub fn daemon_reachable() -> bool {
    matches!(send_request(&ControlRequest::Ping), Ok(ControlResponse::Pong))
}
