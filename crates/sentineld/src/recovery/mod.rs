//! Recovery control: deep escalation, failure records, breaker-protected
//! restart.
//!
//! Triggered once per transition into `failed` (the scheduler owns the
//! edge detection and the in-flight guard). Every trigger produces a
//! failure record with combined routine + deep diagnostics; whether a
//! restart is actually attempted depends on the breaker, the auto-restart
//! switch, and dry-run. Visibility is never lost: a disarmed breaker still
//! gets full diagnostics on every failed transition.

mod breaker;
mod executor;

pub use breaker::RestartBreaker;
pub use executor::{FakeRestart, RestartExecutor, SystemdRestart};

use crate::collector;
use crate::probes::Probe;
use chrono::Utc;
use sentinel_common::{
    AgentEvent, CheckKind, CollectionSnapshot, CombinedDiagnostics, FailureRecord,
    FailureType, MetaLogEntry, ProbeKind, SentinelConfig, SentinelDb,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Timeout for each process-status poll during the recovery window.
const POLL_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Cap on journal events copied next to a failure record.
const MAX_CAPTURED_EVENTS: usize = 50;

pub struct RecoveryController {
    breaker: RestartBreaker,
    executor: Arc<dyn RestartExecutor>,
    process_probe: Arc<dyn Probe>,
    deep_probes: Vec<Arc<dyn Probe>>,
    auto_restart_enabled: bool,
    dry_run: bool,
    restart_wait: Duration,
    deep_timeout: Duration,
    poll_interval: Duration,
}

impl RecoveryController {
    pub fn new(
        config: &SentinelConfig,
        executor: Arc<dyn RestartExecutor>,
        process_probe: Arc<dyn Probe>,
        deep_probes: Vec<Arc<dyn Probe>>,
    ) -> Self {
        Self {
            breaker: RestartBreaker::new(config.restart_failure_threshold),
            executor,
            process_probe,
            deep_probes,
            auto_restart_enabled: config.auto_restart_enabled,
            dry_run: config.dry_run,
            restart_wait: Duration::from_secs(config.restart_wait_secs),
            deep_timeout: config.deep_timeout(),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Shorten the recovery poll cadence (tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn breaker(&self) -> &RestartBreaker {
        &self.breaker
    }

    /// Manual operator re-arm, logged as a persistent meta-event.
    pub fn reset_breaker(&mut self, db: &SentinelDb) {
        self.breaker.reset();
        persist_meta(
            db,
            MetaLogEntry::new("info", "recovery", "restart breaker manually reset"),
        );
    }

    /// Full recovery sequence for one transition into `failed`.
    pub async fn handle_failure(
        &mut self,
        routine: CollectionSnapshot,
        db: &SentinelDb,
    ) -> FailureRecord {
        let deep = self.collect_deep(db).await;
        let diagnostics = CombinedDiagnostics::new(routine, Some(deep));

        let armed = self.auto_restart_enabled && self.breaker.is_armed();
        let attempt = armed && !self.dry_run;

        let mut record = FailureRecord::new(FailureType::AutoDetected, diagnostics, attempt);
        if !attempt {
            record.notes = Some(self.skip_reason(armed).to_string());
        }

        if let Err(e) = db.insert_failure(&record) {
            // A missed write must not stop monitoring.
            error!(error = %e, "failed to persist failure record");
        }
        self.capture_agent_events(&record, db);

        if attempt {
            let successful = self.attempt_restart(db).await;
            record.restart_successful = Some(successful);
            record.recovery_timestamp = Some(Utc::now());

            if successful {
                self.breaker.record_success();
                info!(failure_id = %record.id, "agent recovered after restart");
            } else {
                record.notes = Some("restart did not bring the agent back".to_string());
                if self.breaker.record_failure() {
                    self.persist_breaker_trip(db);
                }
            }

            self.finalize(&record, db);
        } else if self.dry_run {
            info!(
                armed,
                "dry-run: would have restarted the agent service"
            );
        } else {
            info!(reason = self.skip_reason(armed), "auto-restart skipped");
        }

        record
    }

    /// Operator-requested restart: bypasses the breaker and the
    /// auto-restart switch, still recorded and still dry-run-safe.
    pub async fn manual_restart(
        &mut self,
        routine: CollectionSnapshot,
        db: &SentinelDb,
    ) -> FailureRecord {
        let deep = self.collect_deep(db).await;
        let diagnostics = CombinedDiagnostics::new(routine, Some(deep));

        let mut record = FailureRecord::new(FailureType::ManualRestart, diagnostics, false);
        record.severity = "warning".to_string();
        record.notes = Some("restart requested by operator".to_string());

        if let Err(e) = db.insert_failure(&record) {
            error!(error = %e, "failed to persist manual restart record");
        }

        if self.dry_run {
            info!("dry-run: manual restart request not executed");
            record.notes = Some("dry-run: manual restart skipped".to_string());
            self.finalize(&record, db);
            return record;
        }

        let successful = self.attempt_restart(db).await;
        record.restart_successful = Some(successful);
        record.recovery_timestamp = Some(Utc::now());
        if successful {
            // Uniform success-reset policy: a manual recovery clears the
            // consecutive-failure count like an automatic one.
            self.breaker.record_success();
        }

        self.finalize(&record, db);
        record
    }

    /// Run the deep probe set and audit its payloads. Used when a failure
    /// escalates and when an operator forces a check.
    pub async fn collect_deep(&self, db: &SentinelDb) -> CollectionSnapshot {
        info!("running deep diagnostics");
        let deep =
            collector::collect(CheckKind::Deep, &self.deep_probes, self.deep_timeout).await;
        collector::audit_payloads(&deep, db);
        deep
    }

    fn skip_reason(&self, armed: bool) -> &'static str {
        if self.dry_run {
            "dry-run active"
        } else if !self.auto_restart_enabled {
            "auto-restart disabled by configuration"
        } else if !armed {
            "restart breaker disabled"
        } else {
            "restart not attempted"
        }
    }

    /// Invoke the executor and wait (bounded) for the process to return.
    async fn attempt_restart(&mut self, db: &SentinelDb) -> bool {
        match self.executor.restart().await {
            Ok(()) => {
                if self.await_process_return().await {
                    persist_meta(
                        db,
                        MetaLogEntry::new("info", "recovery", "agent restart confirmed"),
                    );
                    true
                } else {
                    warn!(
                        wait_secs = self.restart_wait.as_secs(),
                        "agent did not come back within the recovery window"
                    );
                    persist_meta(
                        db,
                        MetaLogEntry::new(
                            "warning",
                            "recovery",
                            "agent absent after restart window",
                        )
                        .error_kind("recovery_poll_timeout"),
                    );
                    false
                }
            }
            Err(e) => {
                error!(error = %e, "restart invocation failed");
                persist_meta(
                    db,
                    MetaLogEntry::new("error", "recovery", e.to_string())
                        .error_kind(e.kind()),
                );
                false
            }
        }
    }

    async fn await_process_return(&self) -> bool {
        let started = Instant::now();
        loop {
            let result = self.process_probe.run(POLL_PROBE_TIMEOUT).await;
            let running = result.success
                && result
                    .data
                    .get("running")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            if running {
                return true;
            }
            if started.elapsed() >= self.restart_wait {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// The single permitted failure-record mutation: attach the outcome.
    fn finalize(&self, record: &FailureRecord, db: &SentinelDb) {
        if let Err(e) = db.update_failure_outcome(
            record.id,
            record.restart_successful,
            record.recovery_timestamp,
            record.notes.as_deref(),
        ) {
            error!(error = %e, failure_id = %record.id, "failed to persist restart outcome");
        }
    }

    fn persist_breaker_trip(&self, db: &SentinelDb) {
        persist_meta(
            db,
            MetaLogEntry::new(
                "warning",
                "recovery",
                format!(
                    "restart breaker tripped after {} consecutive failures",
                    self.breaker.consecutive_failures()
                ),
            )
            .error_kind("breaker_tripped"),
        );
    }

    /// Copy recent journal events out of the deep snapshot next to the
    /// failure record, so reports can correlate them later.
    fn capture_agent_events(&self, record: &FailureRecord, db: &SentinelDb) {
        let Some(deep) = record.diagnostics.deep.as_ref() else {
            return;
        };
        let Some(raw) = deep
            .successful_data(ProbeKind::SystemEvents)
            .and_then(|d| d.get("system_events"))
            .and_then(Value::as_str)
        else {
            return;
        };

        for event in parse_journal_events(raw, record.id) {
            if let Err(e) = db.insert_agent_event(&event) {
                warn!(error = %e, "failed to persist agent event");
                break;
            }
        }
    }
}

/// Parse `journalctl -o json` output (one JSON object per line) into
/// storable events. Unparseable lines are skipped.
fn parse_journal_events(raw: &str, failure_id: Uuid) -> Vec<AgentEvent> {
    const LEVELS: [&str; 8] = [
        "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
    ];

    raw.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|entry| {
            let message = entry.get("MESSAGE")?.as_str()?.to_string();
            let source = entry
                .get("SYSLOG_IDENTIFIER")
                .or_else(|| entry.get("_SYSTEMD_UNIT"))
                .and_then(Value::as_str)
                .unwrap_or("journal")
                .to_string();
            let level = entry
                .get("PRIORITY")
                .and_then(Value::as_str)
                .and_then(|p| p.parse::<usize>().ok())
                .and_then(|p| LEVELS.get(p))
                .unwrap_or(&"info")
                .to_string();
            let event_timestamp = entry
                .get("__REALTIME_TIMESTAMP")
                .and_then(Value::as_str)
                .and_then(|usec| usec.parse::<i64>().ok())
                .and_then(|usec| chrono::DateTime::from_timestamp_micros(usec))
                .unwrap_or_else(Utc::now);

            Some(AgentEvent {
                event_timestamp,
                source,
                level,
                message,
                related_failure_id: Some(failure_id),
            })
        })
        .take(MAX_CAPTURED_EVENTS)
        .collect()
}

fn persist_meta(db: &SentinelDb, entry: MetaLogEntry) {
    if let Err(e) = db.insert_meta_log(&entry) {
        warn!(error = %e, "failed to persist meta-log entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_lines_parse_into_events() {
        let raw = concat!(
            r#"{"MESSAGE":"interface wt0 down","PRIORITY":"3","SYSLOG_IDENTIFIER":"netbird","__REALTIME_TIMESTAMP":"1710000000000000"}"#,
            "\n",
            "not json\n",
            r#"{"MESSAGE":"route flushed","PRIORITY":"4","_SYSTEMD_UNIT":"systemd-networkd.service"}"#,
        );

        let failure_id = Uuid::new_v4();
        let events = parse_journal_events(raw, failure_id);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "interface wt0 down");
        assert_eq!(events[0].level, "err");
        assert_eq!(events[0].source, "netbird");
        assert_eq!(events[1].source, "systemd-networkd.service");
        assert_eq!(events[1].level, "warning");
        assert_eq!(events[0].related_failure_id, Some(failure_id));
    }

    #[test]
    fn unknown_priority_defaults_to_info() {
        let raw = r#"{"MESSAGE":"hello","PRIORITY":"weird"}"#;
        let events = parse_journal_events(raw, Uuid::new_v4());
        assert_eq!(events[0].level, "info");
        assert_eq!(events[0].source, "journal");
    }
}
