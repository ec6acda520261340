//! SQLite-backed store for health checks, failures, agent events, and
//! meta-logs.
//!
//! Append-only except for the single permitted failure-record update that
//! attaches a restart outcome. Writes are retried a bounded number of times
//! on a busy database; after that the caller logs the loss and keeps
//! monitoring.

use crate::error::StorageError;
use crate::types::{
    CheckKind, CombinedDiagnostics, FailureRecord, FailureType, HealthCheckSummary, HealthStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Write attempts before giving up on a busy database.
const WRITE_ATTEMPTS: u32 = 3;

/// Pause between busy-write retries.
const RETRY_PAUSE: Duration = Duration::from_millis(50);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS health_checks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    check_kind TEXT NOT NULL,
    agent_running INTEGER,
    agent_pid INTEGER,
    agent_uptime_seconds INTEGER,
    agent_cpu_percent REAL,
    agent_memory_mb REAL,
    internet_reachable INTEGER,
    dns_working INTEGER,
    services_status TEXT,
    status TEXT NOT NULL,
    duration_ms INTEGER
);

CREATE TABLE IF NOT EXISTS failures (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    failure_type TEXT NOT NULL,
    severity TEXT,
    diagnostics TEXT NOT NULL,
    auto_restart_attempted INTEGER NOT NULL,
    restart_successful INTEGER,
    recovery_timestamp TEXT,
    notes TEXT
);

CREATE TABLE IF NOT EXISTS agent_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    captured_timestamp TEXT NOT NULL,
    event_timestamp TEXT NOT NULL,
    source TEXT,
    level TEXT,
    message TEXT,
    related_failure_id TEXT REFERENCES failures(id)
);

CREATE TABLE IF NOT EXISTS meta_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    level TEXT,
    component TEXT,
    message TEXT,
    check_name TEXT,
    error_kind TEXT,
    details TEXT
);

CREATE INDEX IF NOT EXISTS idx_health_checks_ts ON health_checks(timestamp);
CREATE INDEX IF NOT EXISTS idx_failures_ts ON failures(timestamp);
"#;

/// Structured meta-event persisted alongside tracing output.
#[derive(Debug, Clone)]
pub struct MetaLogEntry {
    pub level: String,
    pub component: String,
    pub message: String,
    pub check_name: Option<String>,
    pub error_kind: Option<String>,
    pub details: Option<Value>,
}

impl MetaLogEntry {
    pub fn new(level: &str, component: &str, message: impl Into<String>) -> Self {
        Self {
            level: level.to_string(),
            component: component.to_string(),
            message: message.into(),
            check_name: None,
            error_kind: None,
            details: None,
        }
    }

    pub fn check_name(mut self, name: impl Into<String>) -> Self {
        self.check_name = Some(name.into());
        self
    }

    pub fn error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Recent agent log event stored next to the failure that captured it.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub event_timestamp: DateTime<Utc>,
    pub source: String,
    pub level: String,
    pub message: String,
    pub related_failure_id: Option<Uuid>,
}

/// Handle on the sentinel database.
///
/// The connection sits behind a mutex so the handle is `Sync` and can be
/// shared across tasks (the scheduler loop holds it across await points,
/// report generation reads from its own task).
pub struct SentinelDb {
    conn: Mutex<Connection>,
}

impl SentinelDb {
    /// Open or create the database, applying the schema.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::DataDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read-only handle for CLI queries. None if the file does not exist.
    pub fn open_readonly<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return None;
        }
        let conn =
            Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
        Some(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        let conn = self.conn();
        let mut last = None;
        for attempt in 0..WRITE_ATTEMPTS {
            match op(&conn) {
                Ok(v) => return Ok(v),
                Err(e) if is_busy(&e) => {
                    last = Some(e);
                    if attempt + 1 < WRITE_ATTEMPTS {
                        std::thread::sleep(RETRY_PAUSE);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::RetriesExhausted {
            attempts: WRITE_ATTEMPTS,
            source: last.unwrap_or(rusqlite::Error::ExecuteReturnedResults),
        })
    }

    pub fn insert_health_check(
        &self,
        summary: &HealthCheckSummary,
    ) -> Result<i64, StorageError> {
        let services = serde_json::to_string(&summary.services_status)?;
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO health_checks (
                    timestamp, check_kind,
                    agent_running, agent_pid, agent_uptime_seconds,
                    agent_cpu_percent, agent_memory_mb,
                    internet_reachable, dns_working, services_status,
                    status, duration_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    summary.timestamp,
                    summary.check_kind.as_str(),
                    summary.agent_running,
                    summary.agent_pid,
                    summary.agent_uptime_seconds,
                    summary.agent_cpu_percent,
                    summary.agent_memory_mb,
                    summary.internet_reachable,
                    summary.dns_working,
                    services,
                    summary.status.as_str(),
                    summary.duration_ms as i64,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn insert_failure(&self, record: &FailureRecord) -> Result<(), StorageError> {
        let diagnostics = serde_json::to_string(&record.diagnostics)?;
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO failures (
                    id, timestamp, failure_type, severity, diagnostics,
                    auto_restart_attempted, restart_successful,
                    recovery_timestamp, notes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.to_string(),
                    record.timestamp,
                    record.failure_type.as_str(),
                    record.severity,
                    diagnostics,
                    record.auto_restart_attempted,
                    record.restart_successful,
                    record.recovery_timestamp,
                    record.notes,
                ],
            )?;
            Ok(())
        })
    }

    /// The single permitted mutation of a failure record: attach the
    /// restart outcome and recovery timestamp.
    pub fn update_failure_outcome(
        &self,
        id: Uuid,
        restart_successful: Option<bool>,
        recovery_timestamp: Option<DateTime<Utc>>,
        notes: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with_retry(|conn| {
            conn.execute(
                "UPDATE failures
                 SET restart_successful = ?2, recovery_timestamp = ?3, notes = ?4
                 WHERE id = ?1",
                params![id.to_string(), restart_successful, recovery_timestamp, notes],
            )?;
            Ok(())
        })
    }

    pub fn insert_meta_log(&self, entry: &MetaLogEntry) -> Result<(), StorageError> {
        let details = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO meta_logs (
                    timestamp, level, component, message,
                    check_name, error_kind, details
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Utc::now(),
                    entry.level,
                    entry.component,
                    entry.message,
                    entry.check_name,
                    entry.error_kind,
                    details,
                ],
            )?;
            Ok(())
        })
    }

    pub fn insert_agent_event(&self, event: &AgentEvent) -> Result<(), StorageError> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO agent_events (
                    captured_timestamp, event_timestamp, source, level,
                    message, related_failure_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Utc::now(),
                    event.event_timestamp,
                    event.source,
                    event.level,
                    event.message,
                    event.related_failure_id.map(|id| id.to_string()),
                ],
            )?;
            Ok(())
        })
    }

    /// Journal events captured during the recovery pass for one failure.
    pub fn agent_events_for(&self, failure_id: Uuid) -> Result<Vec<AgentEvent>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT event_timestamp, source, level, message, related_failure_id
             FROM agent_events WHERE related_failure_id = ?1
             ORDER BY event_timestamp ASC",
        )?;
        let rows = stmt.query_map(params![failure_id.to_string()], |row| {
            let related: Option<String> = row.get(4)?;
            Ok(AgentEvent {
                event_timestamp: row.get(0)?,
                source: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                level: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                message: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                related_failure_id: related.and_then(|id| Uuid::parse_str(&id).ok()),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn recent_health_checks(
        &self,
        limit: usize,
    ) -> Result<Vec<HealthCheckSummary>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, check_kind, agent_running, agent_pid,
                    agent_uptime_seconds, agent_cpu_percent, agent_memory_mb,
                    internet_reachable, dns_working, services_status,
                    status, duration_ms
             FROM health_checks ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_summary)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn health_checks_since(
        &self,
        start: DateTime<Utc>,
    ) -> Result<Vec<HealthCheckSummary>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, check_kind, agent_running, agent_pid,
                    agent_uptime_seconds, agent_cpu_percent, agent_memory_mb,
                    internet_reachable, dns_working, services_status,
                    status, duration_ms
             FROM health_checks WHERE timestamp >= ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![start], row_to_summary)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn recent_failures(&self, limit: usize) -> Result<Vec<FailureRecord>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, failure_type, severity, diagnostics,
                    auto_restart_attempted, restart_successful,
                    recovery_timestamp, notes
             FROM failures ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_failure)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn failures_since(
        &self,
        start: DateTime<Utc>,
    ) -> Result<Vec<FailureRecord>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, failure_type, severity, diagnostics,
                    auto_restart_attempted, restart_successful,
                    recovery_timestamp, notes
             FROM failures WHERE timestamp >= ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![start], row_to_failure)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<HealthCheckSummary> {
    let check_kind: String = row.get(1)?;
    let services: Option<String> = row.get(9)?;
    let status: String = row.get(10)?;
    Ok(HealthCheckSummary {
        timestamp: row.get(0)?,
        check_kind: match check_kind.as_str() {
            "deep" => CheckKind::Deep,
            _ => CheckKind::Routine,
        },
        agent_running: row.get(2)?,
        agent_pid: row.get(3)?,
        agent_uptime_seconds: row.get(4)?,
        agent_cpu_percent: row.get(5)?,
        agent_memory_mb: row.get(6)?,
        internet_reachable: row.get(7)?,
        dns_working: row.get(8)?,
        services_status: services
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null),
        status: match status.as_str() {
            "healthy" => HealthStatus::Healthy,
            "degraded" => HealthStatus::Degraded,
            _ => HealthStatus::Failed,
        },
        duration_ms: row.get::<_, i64>(11)? as u64,
    })
}

fn row_to_failure(row: &rusqlite::Row<'_>) -> rusqlite::Result<FailureRecord> {
    let id: String = row.get(0)?;
    let failure_type: String = row.get(2)?;
    let diagnostics: String = row.get(4)?;
    Ok(FailureRecord {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        timestamp: row.get(1)?,
        failure_type: match failure_type.as_str() {
            "manual_restart" => FailureType::ManualRestart,
            _ => FailureType::AutoDetected,
        },
        severity: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        diagnostics: serde_json::from_str::<CombinedDiagnostics>(&diagnostics).map_err(
            |e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            },
        )?,
        auto_restart_attempted: row.get(5)?,
        restart_successful: row.get(6)?,
        recovery_timestamp: row.get(7)?,
        notes: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionSnapshot, ProbeKind, ProbeResult};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn test_db() -> (tempfile::TempDir, SentinelDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SentinelDb::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn routine_snapshot() -> CollectionSnapshot {
        let result = ProbeResult::ok(
            ProbeKind::ProcessStatus,
            json!({"running": false, "pid": null}),
            Duration::from_millis(3),
        );
        let mut results = BTreeMap::new();
        results.insert(ProbeKind::ProcessStatus, result);
        CollectionSnapshot {
            timestamp: Utc::now(),
            check_kind: CheckKind::Routine,
            results,
            checks_attempted: 1,
            checks_succeeded: 1,
            checks_failed: Vec::new(),
            duration_ms: 3,
        }
    }

    #[test]
    fn health_check_round_trip() {
        let (_dir, db) = test_db();
        let summary =
            HealthCheckSummary::from_snapshot(&routine_snapshot(), HealthStatus::Failed);
        db.insert_health_check(&summary).unwrap();

        let recent = db.recent_health_checks(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, HealthStatus::Failed);
        assert_eq!(recent[0].agent_running, Some(false));
    }

    #[test]
    fn failure_insert_then_single_update() {
        let (_dir, db) = test_db();
        let record = FailureRecord::new(
            FailureType::AutoDetected,
            CombinedDiagnostics::new(routine_snapshot(), None),
            true,
        );
        db.insert_failure(&record).unwrap();

        let now = Utc::now();
        db.update_failure_outcome(record.id, Some(true), Some(now), Some("restarted"))
            .unwrap();

        let failures = db.recent_failures(5).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, record.id);
        assert_eq!(failures[0].restart_successful, Some(true));
        assert!(failures[0].recovery_timestamp.is_some());
        assert_eq!(failures[0].notes.as_deref(), Some("restarted"));
        assert!(failures[0].auto_restart_attempted);
    }

    #[test]
    fn windowed_readers_filter_by_start() {
        let (_dir, db) = test_db();
        let summary =
            HealthCheckSummary::from_snapshot(&routine_snapshot(), HealthStatus::Healthy);
        db.insert_health_check(&summary).unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(db.health_checks_since(future).unwrap().is_empty());

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(db.health_checks_since(past).unwrap().len(), 1);
    }

    #[test]
    fn meta_logs_and_agent_events_insert() {
        let (_dir, db) = test_db();
        db.insert_meta_log(
            &MetaLogEntry::new("warning", "validator", "payload shape mismatch")
                .check_name("services")
                .error_kind("validation_failed")
                .details(json!({"missing": "services"})),
        )
        .unwrap();

        db.insert_agent_event(&AgentEvent {
            event_timestamp: Utc::now(),
            source: "journal".to_string(),
            level: "err".to_string(),
            message: "interface dropped".to_string(),
            related_failure_id: None,
        })
        .unwrap();
    }

    #[test]
    fn readonly_handle_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SentinelDb::open_readonly(dir.path().join("absent.db")).is_none());

        let path = dir.path().join("present.db");
        drop(SentinelDb::open_at(&path).unwrap());
        assert!(SentinelDb::open_readonly(&path).is_some());
    }

    #[test]
    fn handle_is_shareable_across_tasks() {
        // The scheduler loop holds the handle across await points and the
        // report task reads it concurrently.
        fn assert_shareable<T: Send + Sync + 'static>() {}
        assert_shareable::<SentinelDb>();
    }

    #[test]
    fn unusable_data_dir_reports_the_real_cause() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let result = SentinelDb::open_at(blocker.join("nested").join("s.db"));
        match result {
            Err(StorageError::DataDir { path, .. }) => {
                assert!(path.starts_with(&blocker));
            }
            other => panic!("expected DataDir error, got {:?}", other.err()),
        }
    }
}
