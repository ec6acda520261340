//! Scheduler loop.
//!
//! Single owner of all mutable daemon state: breaker, recovery controller,
//! last classification, counters. Routine checks, report generation, and
//! control requests are serialized through one `tokio::select!` loop, so no
//! state needs locking and no two recoveries can ever overlap.

use crate::collector;
use crate::health;
use crate::probes::{self, Probe};
use crate::recovery::{RecoveryController, SystemdRestart};
use crate::report;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sentinel_common::{
    CheckKind, ControlRequest, ControlResponse, DaemonStatus, FailureSummary,
    HealthCheckSummary, HealthStatus, SentinelConfig, SentinelDb,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// One control request plus the channel its answer travels back on.
pub struct ControlCommand {
    pub request: ControlRequest,
    pub reply: oneshot::Sender<ControlResponse>,
}

pub struct Daemon {
    config: SentinelConfig,
    db: Arc<SentinelDb>,
    routine_probes: Vec<Arc<dyn Probe>>,
    recovery: RecoveryController,
    last_status: Option<HealthStatus>,
    last_check: Option<DateTime<Utc>>,
    checks_run: u64,
    started: Instant,
    /// True only while `handle_failure` is awaited inside `routine_pass`.
    /// Recovery runs inline in the scheduler loop, and status requests are
    /// answered by that same loop, so a served `DaemonStatus` can only ever
    /// carry `false` here. The flag exists for the day recovery moves onto
    /// its own task; until then it documents that the loop never interleaves
    /// a second trigger with a running recovery.
    recovery_in_flight: bool,
}

impl Daemon {
    pub fn new(config: SentinelConfig, db: SentinelDb) -> Self {
        let routine_probes = probes::routine_set(&config);
        let process_probe = Arc::new(probes::ProcessProbe::new(&config.agent_process));
        let recovery = RecoveryController::new(
            &config,
            Arc::new(SystemdRestart::new(&config.agent_unit)),
            process_probe,
            probes::deep_set(&config),
        );
        Self::from_parts(config, db, routine_probes, recovery)
    }

    /// Assembly point shared with tests, which swap in fake probes and a
    /// scripted restart executor.
    pub fn from_parts(
        config: SentinelConfig,
        db: SentinelDb,
        routine_probes: Vec<Arc<dyn Probe>>,
        recovery: RecoveryController,
    ) -> Self {
        Self {
            config,
            db: Arc::new(db),
            routine_probes,
            recovery,
            last_status: None,
            last_check: None,
            checks_run: 0,
            started: Instant::now(),
            recovery_in_flight: false,
        }
    }

    pub async fn run(mut self, mut control_rx: mpsc::Receiver<ControlCommand>) -> Result<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            interval_secs = self.config.routine_interval_secs,
            dry_run = self.config.dry_run,
            "sentinel daemon running"
        );

        let mut routine = tokio::time::interval(Duration::from_secs(
            self.config.routine_interval_secs.max(1),
        ));
        routine.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut report = tokio::time::interval(Duration::from_secs(
            self.config.report_interval_secs.max(1),
        ));
        report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // An interval fires immediately on its first tick; a report at
        // startup would cover an empty window, so swallow that tick.
        report.tick().await;

        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = routine.tick() => self.routine_pass().await,
                _ = report.tick() => self.spawn_report(None),
                command = control_rx.recv() => match command {
                    Some(command) if matches!(command.request, ControlRequest::Shutdown) => {
                        info!("shutdown requested over control socket");
                        let _ = command.reply.send(ControlResponse::Ok {
                            message: "daemon stopping".to_string(),
                        });
                        break;
                    }
                    Some(command) => self.handle_control(command).await,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One routine monitoring pass: collect, classify, persist, and fire
    /// recovery on a transition into `failed`.
    async fn routine_pass(&mut self) {
        let snapshot = collector::collect(
            CheckKind::Routine,
            &self.routine_probes,
            self.config.routine_timeout(),
        )
        .await;
        collector::audit_payloads(&snapshot, &self.db);

        let status = health::assess(&snapshot);
        self.checks_run += 1;
        self.last_check = Some(snapshot.timestamp);

        let summary = HealthCheckSummary::from_snapshot(&snapshot, status);
        if let Err(e) = self.db.insert_health_check(&summary) {
            error!(error = %e, "failed to persist health check");
        }

        match status {
            HealthStatus::Healthy => info!(
                status = %status,
                duration_ms = snapshot.duration_ms,
                "routine check complete"
            ),
            HealthStatus::Degraded => warn!(
                status = %status,
                failed = ?snapshot.failed_kinds(),
                "agent degraded"
            ),
            HealthStatus::Failed => warn!(status = %status, "agent failed"),
        }

        let previous = self.last_status.replace(status);

        // Edge-triggered: recovery fires only on the transition into
        // `failed`, never again while the state persists.
        if status == HealthStatus::Failed && previous != Some(HealthStatus::Failed) {
            if self.recovery_in_flight {
                warn!("recovery already in flight, skipping trigger");
                return;
            }
            self.recovery_in_flight = true;
            let record = self.recovery.handle_failure(snapshot, &self.db).await;
            self.recovery_in_flight = false;
            info!(
                failure_id = %record.id,
                restart_attempted = record.auto_restart_attempted,
                restart_successful = ?record.restart_successful,
                "recovery pass finished"
            );
        }
    }

    /// Generate a report on a separate task so that capturing agent status
    /// (an external command) can never stall scheduled checks. The task
    /// answers the control client itself when one is waiting.
    fn spawn_report(&self, reply: Option<oneshot::Sender<ControlResponse>>) {
        let config = self.config.clone();
        let db = Arc::clone(&self.db);
        tokio::spawn(async move {
            let outcome = report::generate(&config, &db).await;
            match &outcome {
                Ok(path) => info!(path = %path.display(), "report written"),
                Err(e) => error!(error = %e, "report generation failed"),
            }
            if let Some(reply) = reply {
                let response = match outcome {
                    Ok(path) => ControlResponse::Report { path },
                    Err(e) => ControlResponse::Error {
                        message: format!("report generation failed: {e}"),
                    },
                };
                let _ = reply.send(response);
            }
        });
    }

    async fn handle_control(&mut self, command: ControlCommand) {
        if matches!(command.request, ControlRequest::Report) {
            self.spawn_report(Some(command.reply));
            return;
        }
        let response = self.dispatch(command.request).await;
        // The client may have timed out and gone; nothing to do then.
        let _ = command.reply.send(response);
    }

    async fn dispatch(&mut self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Ping => ControlResponse::Pong,
            ControlRequest::Status => ControlResponse::Status(self.status()),
            ControlRequest::ForceCheck => self.force_check().await,
            ControlRequest::ResetBreaker => {
                self.recovery.reset_breaker(&self.db);
                info!("restart breaker reset by operator");
                ControlResponse::Ok {
                    message: "breaker re-armed, failure count cleared".to_string(),
                }
            }
            ControlRequest::RestartNow => self.manual_restart().await,
            ControlRequest::RecentFailures { limit } => {
                match self.db.recent_failures(limit) {
                    Ok(records) => ControlResponse::Failures {
                        failures: records.iter().map(FailureSummary::from).collect(),
                    },
                    Err(e) => ControlResponse::Error {
                        message: format!("failed to read failures: {e}"),
                    },
                }
            }
            // Both intercepted before dispatch: reports are spawned onto
            // their own task, shutdown breaks the loop.
            ControlRequest::Report => ControlResponse::Error {
                message: "report request reached dispatch".to_string(),
            },
            ControlRequest::Shutdown => ControlResponse::Ok {
                message: "daemon stopping".to_string(),
            },
        }
    }

    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            uptime_secs: self.started.elapsed().as_secs(),
            last_status: self.last_status,
            last_check: self.last_check,
            checks_run: self.checks_run,
            breaker_mode: self.recovery.breaker().mode(),
            consecutive_restart_failures: self.recovery.breaker().consecutive_failures(),
            restart_failure_threshold: self.recovery.breaker().threshold(),
            auto_restart_enabled: self.config.auto_restart_enabled,
            dry_run: self.config.dry_run,
            recovery_in_flight: self.recovery_in_flight,
        }
    }

    /// Immediate routine + deep collection on operator request. Persisted
    /// like a routine pass, but never drives recovery; the scheduler's own
    /// edge detection picks up any failure on its next tick.
    async fn force_check(&mut self) -> ControlResponse {
        info!("force check requested");
        let routine = collector::collect(
            CheckKind::Routine,
            &self.routine_probes,
            self.config.routine_timeout(),
        )
        .await;
        collector::audit_payloads(&routine, &self.db);

        let status = health::assess(&routine);
        self.checks_run += 1;
        self.last_check = Some(routine.timestamp);

        let summary = HealthCheckSummary::from_snapshot(&routine, status);
        if let Err(e) = self.db.insert_health_check(&summary) {
            error!(error = %e, "failed to persist forced check");
        }

        // A forced check is the operator asking for everything at once, so
        // the deep set runs too; its payloads surface in the next report.
        let deep = self.recovery.collect_deep(&self.db).await;
        let broken = deep.failed_kinds();
        if !broken.is_empty() {
            warn!(failed = ?broken, "deep diagnostics reported problems");
        }

        ControlResponse::Check { status, summary }
    }

    async fn manual_restart(&mut self) -> ControlResponse {
        info!("manual restart requested");
        let routine = collector::collect(
            CheckKind::Routine,
            &self.routine_probes,
            self.config.routine_timeout(),
        )
        .await;

        let record = self.recovery.manual_restart(routine, &self.db).await;
        let message = match record.restart_successful {
            Some(true) => "agent restarted and confirmed running".to_string(),
            Some(false) => "restart issued but the agent did not come back".to_string(),
            None => "dry-run: restart not executed".to_string(),
        };
        ControlResponse::Ok { message }
    }
}
