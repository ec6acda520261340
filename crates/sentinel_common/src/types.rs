//! Core data model: probe outcomes, collection snapshots, health status,
//! failure records.
//!
//! Everything here is plain data. Probes produce `ProbeResult`s, the
//! collector merges them into a `CollectionSnapshot`, the evaluator derives
//! a `HealthStatus`, and the recovery controller turns a failed transition
//! into a `FailureRecord`. None of these types carry behavior beyond
//! construction and lookup helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Kind of diagnostic probe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Is the watched agent process alive (pid, uptime, cpu, memory)?
    ProcessStatus,
    /// Raw internet reachability (TCP connect to a well-known endpoint).
    Internet,
    /// DNS resolution of a check domain.
    DnsResolution,
    /// Per-service HTTP reachability for the configured service list.
    Services,
    /// Network adapter enumeration (deep).
    NetworkAdapters,
    /// Routing table dump (deep).
    RoutingTable,
    /// Resolver configuration per link (deep).
    DnsServers,
    /// Active socket/connection listing (deep).
    ActiveConnections,
    /// Recent system log events (deep).
    SystemEvents,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessStatus => "process_status",
            Self::Internet => "internet",
            Self::DnsResolution => "dns_resolution",
            Self::Services => "services",
            Self::NetworkAdapters => "network_adapters",
            Self::RoutingTable => "routing_table",
            Self::DnsServers => "dns_servers",
            Self::ActiveConnections => "active_connections",
            Self::SystemEvents => "system_events",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a probe failed to produce usable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    /// The probe did not finish within its timeout and was abandoned.
    Timeout,
    /// The probe ran but errored (command failure, panic, I/O error).
    Exception,
    /// The probe cannot run on this host (missing tool, unsupported).
    NotApplicable,
}

impl ProbeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Exception => "exception",
            Self::NotApplicable => "not_applicable",
        }
    }
}

/// Structured outcome of one probe invocation. Immutable once produced.
///
/// A probe that ran successfully but observed a negative condition (process
/// absent, host unreachable) reports `success: true` with the negative
/// finding inside `data`. `success: false` means the probe itself failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub success: bool,
    /// Probe-kind-specific payload, shape-checked by the validator.
    pub data: Value,
    pub error: Option<String>,
    pub error_kind: Option<ProbeErrorKind>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    pub fn ok(kind: ProbeKind, data: Value, elapsed: Duration) -> Self {
        Self {
            kind,
            success: true,
            data,
            error: None,
            error_kind: None,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        kind: ProbeKind,
        error_kind: ProbeErrorKind,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            kind,
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            error_kind: Some(error_kind),
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Synthetic result for a probe that was abandoned at its timeout.
    pub fn timed_out(kind: ProbeKind, timeout: Duration) -> Self {
        Self::failed(
            kind,
            ProbeErrorKind::Timeout,
            format!("probe did not finish within {}s", timeout.as_secs()),
            timeout,
        )
    }
}

/// Which probe set a collection pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Routine,
    Deep,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Deep => "deep",
        }
    }
}

/// One failed probe inside a snapshot, with its structured reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckFailure {
    pub kind: ProbeKind,
    pub error_kind: ProbeErrorKind,
    pub detail: String,
}

/// Merged result of one collection pass. Built exclusively by the
/// collector; read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub check_kind: CheckKind,
    pub results: BTreeMap<ProbeKind, ProbeResult>,
    pub checks_attempted: usize,
    pub checks_succeeded: usize,
    pub checks_failed: Vec<CheckFailure>,
    pub duration_ms: u64,
}

impl CollectionSnapshot {
    pub fn result(&self, kind: ProbeKind) -> Option<&ProbeResult> {
        self.results.get(&kind)
    }

    /// Payload of a probe that ran and succeeded, None otherwise.
    pub fn successful_data(&self, kind: ProbeKind) -> Option<&Value> {
        self.results
            .get(&kind)
            .filter(|r| r.success)
            .map(|r| &r.data)
    }

    pub fn failed_kinds(&self) -> Vec<ProbeKind> {
        self.checks_failed.iter().map(|f| f.kind).collect()
    }
}

/// Tiered health classification, derived solely from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routine and deep snapshots combined for failure diagnostics.
///
/// Kept as an explicit pair rather than a merged map; when both passes ran
/// the same probe kind, the deep result takes precedence on lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedDiagnostics {
    pub routine: CollectionSnapshot,
    pub deep: Option<CollectionSnapshot>,
}

impl CombinedDiagnostics {
    pub fn new(routine: CollectionSnapshot, deep: Option<CollectionSnapshot>) -> Self {
        Self { routine, deep }
    }

    /// Lookup with deep-over-routine precedence.
    pub fn result(&self, kind: ProbeKind) -> Option<&ProbeResult> {
        self.deep
            .as_ref()
            .and_then(|d| d.result(kind))
            .or_else(|| self.routine.result(kind))
    }
}

/// Why a failure record was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Routine check classified the agent as failed.
    AutoDetected,
    /// Operator requested a restart outside the breaker.
    ManualRestart,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoDetected => "auto_detected",
            Self::ManualRestart => "manual_restart",
        }
    }
}

/// Record of one transition into `failed`, created exactly once and later
/// updated exactly once with the restart outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub failure_type: FailureType,
    pub severity: String,
    pub diagnostics: CombinedDiagnostics,
    pub auto_restart_attempted: bool,
    pub restart_successful: Option<bool>,
    pub recovery_timestamp: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl FailureRecord {
    pub fn new(
        failure_type: FailureType,
        diagnostics: CombinedDiagnostics,
        auto_restart_attempted: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            failure_type,
            severity: "critical".to_string(),
            diagnostics,
            auto_restart_attempted,
            restart_successful: None,
            recovery_timestamp: None,
            notes: None,
        }
    }
}

/// Restart-breaker mode. `Disabled` is sticky until an operator resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerMode {
    Armed,
    Disabled,
}

impl BreakerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Armed => "armed",
            Self::Disabled => "disabled",
        }
    }
}

/// Flattened per-check summary row, persisted for every routine pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSummary {
    pub timestamp: DateTime<Utc>,
    pub check_kind: CheckKind,
    pub agent_running: Option<bool>,
    pub agent_pid: Option<i64>,
    pub agent_uptime_seconds: Option<i64>,
    pub agent_cpu_percent: Option<f64>,
    pub agent_memory_mb: Option<f64>,
    pub internet_reachable: Option<bool>,
    pub dns_working: Option<bool>,
    /// Per-service reachability map as reported by the services probe.
    pub services_status: Value,
    pub status: HealthStatus,
    pub duration_ms: u64,
}

impl HealthCheckSummary {
    /// Flatten a routine snapshot plus its classification into one row.
    pub fn from_snapshot(snapshot: &CollectionSnapshot, status: HealthStatus) -> Self {
        let process = snapshot.successful_data(ProbeKind::ProcessStatus);
        let internet = snapshot.successful_data(ProbeKind::Internet);
        let dns = snapshot.successful_data(ProbeKind::DnsResolution);
        let services = snapshot
            .successful_data(ProbeKind::Services)
            .and_then(|d| d.get("services"))
            .cloned()
            .unwrap_or(Value::Null);

        let field = |v: Option<&Value>, key: &str| v.and_then(|v| v.get(key)).cloned();

        Self {
            timestamp: snapshot.timestamp,
            check_kind: snapshot.check_kind,
            agent_running: field(process, "running").and_then(|v| v.as_bool()),
            agent_pid: field(process, "pid").and_then(|v| v.as_i64()),
            agent_uptime_seconds: field(process, "uptime_seconds").and_then(|v| v.as_i64()),
            agent_cpu_percent: field(process, "cpu_percent").and_then(|v| v.as_f64()),
            agent_memory_mb: field(process, "memory_mb").and_then(|v| v.as_f64()),
            internet_reachable: field(internet, "internet_reachable").and_then(|v| v.as_bool()),
            dns_working: field(dns, "dns_working").and_then(|v| v.as_bool()),
            services_status: services,
            status,
            duration_ms: snapshot.duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_with(results: Vec<ProbeResult>) -> CollectionSnapshot {
        let attempted = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| CheckFailure {
                kind: r.kind,
                error_kind: r.error_kind.unwrap_or(ProbeErrorKind::Exception),
                detail: r.error.clone().unwrap_or_default(),
            })
            .collect();
        CollectionSnapshot {
            timestamp: Utc::now(),
            check_kind: CheckKind::Routine,
            results: results.into_iter().map(|r| (r.kind, r)).collect(),
            checks_attempted: attempted,
            checks_succeeded: succeeded,
            checks_failed: failed,
            duration_ms: 12,
        }
    }

    #[test]
    fn successful_data_skips_failed_probes() {
        let snap = snapshot_with(vec![
            ProbeResult::ok(
                ProbeKind::ProcessStatus,
                json!({"running": true}),
                Duration::from_millis(5),
            ),
            ProbeResult::timed_out(ProbeKind::Services, Duration::from_secs(5)),
        ]);

        assert!(snap.successful_data(ProbeKind::ProcessStatus).is_some());
        assert!(snap.successful_data(ProbeKind::Services).is_none());
        assert_eq!(snap.failed_kinds(), vec![ProbeKind::Services]);
    }

    #[test]
    fn combined_diagnostics_prefers_deep() {
        let routine = snapshot_with(vec![ProbeResult::ok(
            ProbeKind::ProcessStatus,
            json!({"running": false}),
            Duration::from_millis(5),
        )]);
        let mut deep = snapshot_with(vec![ProbeResult::ok(
            ProbeKind::ProcessStatus,
            json!({"running": true}),
            Duration::from_millis(5),
        )]);
        deep.check_kind = CheckKind::Deep;

        let combined = CombinedDiagnostics::new(routine, Some(deep));
        let result = combined.result(ProbeKind::ProcessStatus).unwrap();
        assert_eq!(result.data["running"], json!(true));
    }

    #[test]
    fn summary_flattens_probe_payloads() {
        let snap = snapshot_with(vec![
            ProbeResult::ok(
                ProbeKind::ProcessStatus,
                json!({"running": true, "pid": 4242, "uptime_seconds": 90, "cpu_percent": 1.5, "memory_mb": 33.0, "threads": 9}),
                Duration::from_millis(5),
            ),
            ProbeResult::ok(
                ProbeKind::Internet,
                json!({"internet_reachable": true, "latency_ms": 11}),
                Duration::from_millis(11),
            ),
            ProbeResult::ok(
                ProbeKind::Services,
                json!({"services": {"gitea.example.net:3000": {"reachable": true}}}),
                Duration::from_millis(40),
            ),
        ]);

        let summary = HealthCheckSummary::from_snapshot(&snap, HealthStatus::Healthy);
        assert_eq!(summary.agent_running, Some(true));
        assert_eq!(summary.agent_pid, Some(4242));
        assert_eq!(summary.internet_reachable, Some(true));
        assert_eq!(summary.dns_working, None);
        assert!(summary.services_status.get("gitea.example.net:3000").is_some());
    }

    #[test]
    fn probe_kind_string_forms_are_stable() {
        assert_eq!(ProbeKind::ProcessStatus.as_str(), "process_status");
        assert_eq!(
            serde_json::to_string(&ProbeKind::SystemEvents).unwrap(),
            "\"system_events\""
        );
        assert_eq!(ProbeErrorKind::NotApplicable.as_str(), "not_applicable");
    }
}
