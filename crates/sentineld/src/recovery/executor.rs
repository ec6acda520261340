//! Restart executor capability.
//!
//! Production restarts go through systemd. Tests script a fake. Both are
//! safe to invoke repeatedly; restarting an already-restarting unit is a
//! no-op at worst.

use async_trait::async_trait;
use sentinel_common::RestartError;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::process::Command;
use tracing::info;

#[async_trait]
pub trait RestartExecutor: Send + Sync {
    async fn restart(&self) -> Result<(), RestartError>;
}

/// Restart the agent's systemd unit.
pub struct SystemdRestart {
    unit: String,
}

impl SystemdRestart {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
        }
    }
}

#[async_trait]
impl RestartExecutor for SystemdRestart {
    async fn restart(&self) -> Result<(), RestartError> {
        info!(unit = %self.unit, "restarting agent service");

        let output = Command::new("systemctl")
            .args(["restart", &self.unit])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RestartError::Failed {
                unit: self.unit.clone(),
                detail: format!("failed to invoke systemctl: {e}"),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let lowered = stderr.to_lowercase();

        if lowered.contains("access denied") || lowered.contains("permission denied") {
            Err(RestartError::PermissionDenied {
                unit: self.unit.clone(),
            })
        } else if lowered.contains("not found") || lowered.contains("not loaded") {
            Err(RestartError::TargetNotFound {
                unit: self.unit.clone(),
            })
        } else {
            Err(RestartError::Failed {
                unit: self.unit.clone(),
                detail: stderr,
            })
        }
    }
}

/// Scripted executor for deterministic tests: pop the next outcome, count
/// every invocation.
pub struct FakeRestart {
    outcomes: Mutex<VecDeque<Result<(), RestartError>>>,
    invocations: AtomicUsize,
}

impl FakeRestart {
    /// Every invocation succeeds.
    pub fn succeeding() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Pop scripted outcomes in order; once exhausted, succeed.
    pub fn scripted(outcomes: Vec<Result<(), RestartError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn failing_with(error: impl Fn() -> RestartError, times: usize) -> Self {
        Self::scripted((0..times).map(|_| Err(error())).collect())
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RestartExecutor for FakeRestart {
    async fn restart(&self) -> Result<(), RestartError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(Ok(()))
    }
}
