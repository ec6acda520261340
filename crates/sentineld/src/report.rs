//! Periodic report bundles.
//!
//! A report summarizes one window of stored history: health-check rows,
//! failure records, per-service reachability counts, and a set of derived
//! issue lines an operator can read without opening the database. Report
//! generation only reads; it never mutates monitoring state.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sentinel_common::{FailureSummary, HealthCheckSummary, SentinelConfig, SentinelDb};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Bound on the agent's own status subcommand; a wedged agent binary must
/// not hold up report generation.
const AGENT_STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
pub struct ReportBundle {
    pub generated_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub check_count: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub issues: Vec<String>,
    pub service_summary: BTreeMap<String, ServiceWindowStats>,
    pub failures: Vec<FailureSummary>,
    pub snapshots: Vec<HealthCheckSummary>,
    /// Raw deep-probe payloads from the latest failure in the window,
    /// attached unmodified.
    pub attachments: BTreeMap<String, Value>,
    /// Output of the agent's own status command, if it could be captured.
    pub agent_status: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ServiceWindowStats {
    pub checks: usize,
    pub reachable: usize,
}

/// Build the bundle for the trailing report window and write it under the
/// report directory as a timestamped JSON file.
pub async fn generate(config: &SentinelConfig, db: &SentinelDb) -> Result<PathBuf> {
    let window_end = Utc::now();
    let window_start = window_end - ChronoDuration::seconds(config.report_interval_secs as i64);

    let bundle = build_bundle(config, db, window_start, window_end).await?;

    let dir = config.report_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create report directory {}", dir.display()))?;

    let path = dir.join(format!(
        "report-{}.json",
        window_end.format("%Y%m%d-%H%M%S")
    ));
    let json = serde_json::to_string_pretty(&bundle)?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write report {}", path.display()))?;

    Ok(path)
}

pub async fn build_bundle(
    config: &SentinelConfig,
    db: &SentinelDb,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<ReportBundle> {
    let snapshots = db.health_checks_since(window_start)?;
    let failures = db.failures_since(window_start)?;

    let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
    for snapshot in &snapshots {
        *status_counts
            .entry(snapshot.status.as_str().to_string())
            .or_default() += 1;
    }

    Ok(ReportBundle {
        generated_at: Utc::now(),
        window_start,
        window_end,
        check_count: snapshots.len(),
        status_counts,
        issues: detect_issues(&snapshots, &failures.iter().collect::<Vec<_>>()),
        service_summary: summarize_services(&snapshots),
        attachments: latest_failure_attachments(&failures),
        failures: failures.iter().map(FailureSummary::from).collect(),
        snapshots,
        agent_status: capture_agent_status(&config.agent_process, AGENT_STATUS_TIMEOUT).await,
    })
}

/// Deep-probe payloads from the most recent failure, keyed by probe kind.
fn latest_failure_attachments(
    failures: &[sentinel_common::FailureRecord],
) -> BTreeMap<String, Value> {
    let Some(deep) = failures
        .last()
        .and_then(|f| f.diagnostics.deep.as_ref())
    else {
        return BTreeMap::new();
    };

    deep.results
        .values()
        .filter(|r| r.success)
        .map(|r| (r.kind.as_str().to_string(), r.data.clone()))
        .collect()
}

/// Per-service reachability counts across the window.
fn summarize_services(snapshots: &[HealthCheckSummary]) -> BTreeMap<String, ServiceWindowStats> {
    let mut summary: BTreeMap<String, ServiceWindowStats> = BTreeMap::new();
    for snapshot in snapshots {
        let Some(services) = snapshot.services_status.as_object() else {
            continue;
        };
        for (name, entry) in services {
            let stats = summary.entry(name.clone()).or_default();
            stats.checks += 1;
            if service_reachable(entry) {
                stats.reachable += 1;
            }
        }
    }
    summary
}

fn service_reachable(entry: &Value) -> bool {
    entry
        .get("reachable")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Heuristic issue lines derived from the window's history.
fn detect_issues(
    snapshots: &[HealthCheckSummary],
    failures: &[&sentinel_common::FailureRecord],
) -> Vec<String> {
    let mut issues = Vec::new();
    let total = snapshots.len();
    if total == 0 {
        issues.push("no health checks recorded in this window".to_string());
        return issues;
    }

    let down = snapshots
        .iter()
        .filter(|s| s.agent_running == Some(false))
        .count();
    if down > 0 {
        issues.push(format!("agent process down in {down} of {total} checks"));
    }

    let offline = snapshots
        .iter()
        .filter(|s| s.internet_reachable == Some(false))
        .count();
    if offline > 0 {
        issues.push(format!("internet unreachable in {offline} of {total} checks"));
    }

    let dns_broken = snapshots
        .iter()
        .filter(|s| s.dns_working == Some(false))
        .count();
    if dns_broken > 0 {
        issues.push(format!("DNS resolution failing in {dns_broken} of {total} checks"));
    }

    // Services dark while the raw IP endpoint answered: points at DNS or
    // overlay routing rather than the uplink.
    let divergent = snapshots
        .iter()
        .filter(|s| {
            s.internet_reachable == Some(true)
                && s.services_status
                    .as_object()
                    .map(|m| !m.is_empty() && m.values().all(|e| !service_reachable(e)))
                    .unwrap_or(false)
        })
        .count();
    if divergent > 0 {
        issues.push(format!(
            "all services unreachable while raw connectivity held in {divergent} checks, \
             possible DNS or overlay routing problem"
        ));
    }

    for (name, stats) in summarize_services(snapshots) {
        if stats.checks > 0 && stats.reachable == 0 {
            issues.push(format!("service {name} unreachable for the entire window"));
        }
    }

    let unrecovered = failures
        .iter()
        .filter(|f| f.auto_restart_attempted && f.restart_successful == Some(false))
        .count();
    if unrecovered > 0 {
        issues.push(format!("{unrecovered} restart attempts did not recover the agent"));
    }

    issues
}

/// Run the agent's own status subcommand and capture its output, bounded
/// by `timeout`. Any failure, including the bound expiring, degrades to
/// `None`; the report is still written without the status text.
async fn capture_agent_status(agent_process: &str, timeout: Duration) -> Option<String> {
    let output = Command::new(agent_process)
        .arg("status")
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.status.success() {
                text.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            Some(text)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "could not capture agent status output");
            None
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "agent status command did not finish in time"
            );
            None
        }
    }
}
