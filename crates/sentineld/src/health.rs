//! Health classification: one pure function from snapshot to status.
//!
//! Deterministic by construction; identical snapshots always classify
//! identically, which is what lets force-check reuse the same path and
//! tests enumerate the whole table.

use sentinel_common::{CollectionSnapshot, HealthStatus, ProbeKind};
use serde_json::Value;

/// Classify a routine snapshot.
///
/// Rules, evaluated only against probes that ran and succeeded:
/// - process absent, or present with zero reachable services while the
///   services probe itself succeeded: failed
/// - process present, some but not all services reachable: degraded
/// - process present, all services reachable: healthy
///
/// Missing or failed probe data is never upgraded: no process confirmation
/// means failed, no service data (with the process confirmed) means
/// degraded.
pub fn assess(snapshot: &CollectionSnapshot) -> HealthStatus {
    let running = snapshot
        .successful_data(ProbeKind::ProcessStatus)
        .and_then(|data| data.get("running"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !running {
        return HealthStatus::Failed;
    }

    let services = snapshot
        .successful_data(ProbeKind::Services)
        .and_then(|data| data.get("services"))
        .and_then(Value::as_object);

    match services {
        Some(services) => {
            let total = services.len();
            let reachable = services
                .values()
                .filter(|entry| {
                    entry
                        .get("reachable")
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                })
                .count();

            if reachable == 0 {
                // Zero reachable covers the empty-list case too: with
                // nothing confirmed reachable the agent is not doing its job.
                HealthStatus::Failed
            } else if reachable < total {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            }
        }
        // Services probe errored or missing: the process is up but
        // connectivity is unconfirmed. Partial data never reads as healthy.
        None => HealthStatus::Degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_common::{CheckKind, ProbeResult};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn snapshot(results: Vec<ProbeResult>) -> CollectionSnapshot {
        let attempted = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        CollectionSnapshot {
            timestamp: Utc::now(),
            check_kind: CheckKind::Routine,
            results: results.into_iter().map(|r| (r.kind, r)).collect(),
            checks_attempted: attempted,
            checks_succeeded: succeeded,
            checks_failed: Vec::new(),
            duration_ms: 1,
        }
    }

    fn process(running: bool) -> ProbeResult {
        ProbeResult::ok(
            ProbeKind::ProcessStatus,
            json!({"running": running}),
            Duration::from_millis(1),
        )
    }

    fn services(reachable: &[bool]) -> ProbeResult {
        let map: serde_json::Map<String, serde_json::Value> = reachable
            .iter()
            .enumerate()
            .map(|(i, up)| (format!("svc{i}"), json!({"reachable": up})))
            .collect();
        ProbeResult::ok(
            ProbeKind::Services,
            json!({"services": map}),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn process_absent_is_failed_regardless_of_services() {
        for svc in [&[true, true, true][..], &[false, false, false], &[]] {
            let snap = snapshot(vec![process(false), services(svc)]);
            assert_eq!(assess(&snap), HealthStatus::Failed);
        }
    }

    #[test]
    fn zero_of_n_reachable_is_failed() {
        let snap = snapshot(vec![process(true), services(&[false, false, false])]);
        assert_eq!(assess(&snap), HealthStatus::Failed);
    }

    #[test]
    fn some_but_not_all_reachable_is_degraded() {
        let snap = snapshot(vec![process(true), services(&[true, false, true])]);
        assert_eq!(assess(&snap), HealthStatus::Degraded);

        let snap = snapshot(vec![process(true), services(&[true, false, false])]);
        assert_eq!(assess(&snap), HealthStatus::Degraded);
    }

    #[test]
    fn all_reachable_is_healthy() {
        let snap = snapshot(vec![process(true), services(&[true, true, true])]);
        assert_eq!(assess(&snap), HealthStatus::Healthy);
    }

    #[test]
    fn missing_process_data_is_not_confirmed_running() {
        // No process probe at all.
        let snap = snapshot(vec![services(&[true, true])]);
        assert_eq!(assess(&snap), HealthStatus::Failed);

        // Process probe errored.
        let snap = snapshot(vec![
            ProbeResult::failed(
                ProbeKind::ProcessStatus,
                sentinel_common::ProbeErrorKind::Exception,
                "scan failed",
                Duration::from_millis(1),
            ),
            services(&[true, true]),
        ]);
        assert_eq!(assess(&snap), HealthStatus::Failed);
    }

    #[test]
    fn failed_services_probe_degrades_instead_of_failing() {
        let snap = snapshot(vec![
            process(true),
            ProbeResult::timed_out(ProbeKind::Services, Duration::from_secs(5)),
        ]);
        assert_eq!(assess(&snap), HealthStatus::Degraded);
    }

    #[test]
    fn assessment_is_deterministic() {
        let snap = snapshot(vec![process(true), services(&[true, false])]);
        let first = assess(&snap);
        for _ in 0..100 {
            assert_eq!(assess(&snap), first);
        }
    }
}
