//! Probe collection: fan out, bound, merge.
//!
//! Every probe runs in its own task under its own timeout. A hung or
//! crashed probe is recorded as a structured failure and abandoned; it can
//! never block or poison the rest of the pass. The whole pass therefore
//! takes about the longest single timeout, not the sum.

use crate::probes::Probe;
use crate::validator;
use sentinel_common::{
    CheckFailure, CheckKind, CollectionSnapshot, MetaLogEntry, ProbeErrorKind, ProbeKind,
    ProbeResult, SentinelDb,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Run one collection pass over the given probe set.
pub async fn collect(
    check_kind: CheckKind,
    probes: &[Arc<dyn Probe>],
    per_probe_timeout: Duration,
) -> CollectionSnapshot {
    let started = Instant::now();
    let timestamp = Utc::now();

    let mut handles = Vec::with_capacity(probes.len());
    for probe in probes {
        let probe = Arc::clone(probe);
        let kind = probe.kind();
        handles.push((
            kind,
            tokio::spawn(async move {
                match tokio::time::timeout(per_probe_timeout, probe.run(per_probe_timeout)).await
                {
                    Ok(result) => result,
                    // Abandon the probe; its future is dropped here.
                    Err(_) => ProbeResult::timed_out(kind, per_probe_timeout),
                }
            }),
        ));
    }

    let mut results: BTreeMap<ProbeKind, ProbeResult> = BTreeMap::new();
    for (kind, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => ProbeResult::failed(
                kind,
                ProbeErrorKind::Exception,
                format!("probe task panicked: {e}"),
                started.elapsed(),
            ),
        };
        debug!(probe = %kind, success = result.success, duration_ms = result.duration_ms, "probe finished");
        results.insert(kind, result);
    }

    let checks_attempted = results.len();
    let checks_succeeded = results.values().filter(|r| r.success).count();
    let checks_failed = results
        .values()
        .filter(|r| !r.success)
        .map(|r| CheckFailure {
            kind: r.kind,
            error_kind: r.error_kind.unwrap_or(ProbeErrorKind::Exception),
            detail: r.error.clone().unwrap_or_default(),
        })
        .collect();

    CollectionSnapshot {
        timestamp,
        check_kind,
        results,
        checks_attempted,
        checks_succeeded,
        checks_failed,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Shape-check every successful payload in a snapshot.
///
/// Mismatches are flagged (tracing + meta-log row) and left in place;
/// validation never removes or repairs a payload. Returns the offending
/// kinds so callers can note degraded confidence.
pub fn audit_payloads(snapshot: &CollectionSnapshot, db: &SentinelDb) -> Vec<ProbeKind> {
    let mut invalid = Vec::new();

    for result in snapshot.results.values() {
        if !result.success {
            continue;
        }
        if validator::validate(result.kind, &result.data) {
            continue;
        }

        warn!(probe = %result.kind, "probe payload failed schema validation");
        let entry = MetaLogEntry::new(
            "warning",
            "validator",
            format!("{} payload failed schema validation", result.kind),
        )
        .check_name(result.kind.as_str())
        .error_kind("validation_failed")
        .details(result.data.clone());
        if let Err(e) = db.insert_meta_log(&entry) {
            warn!(error = %e, "failed to persist validation meta-event");
        }

        invalid.push(result.kind);
    }

    invalid
}
