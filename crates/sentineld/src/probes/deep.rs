//! Deep diagnostic probes: command-based enumeration of adapters, routes,
//! resolver configuration, sockets, and recent system log events.
//!
//! These run only on suspected failure, under the longer deep timeout.
//! Output is captured raw; reports attach it unmodified.

use super::Probe;
use async_trait::async_trait;
use sentinel_common::{ProbeErrorKind, ProbeKind, ProbeResult};
use serde_json::json;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// One external command whose stdout becomes the probe payload.
pub struct CommandProbe {
    kind: ProbeKind,
    program: &'static str,
    args: &'static [&'static str],
    payload_key: &'static str,
}

impl CommandProbe {
    pub fn adapters() -> Self {
        Self {
            kind: ProbeKind::NetworkAdapters,
            program: "ip",
            args: &["-j", "addr", "show"],
            payload_key: "adapters_json",
        }
    }

    pub fn routing_table() -> Self {
        Self {
            kind: ProbeKind::RoutingTable,
            program: "ip",
            args: &["route", "show"],
            payload_key: "routing_table",
        }
    }

    pub fn dns_servers() -> Self {
        Self {
            kind: ProbeKind::DnsServers,
            program: "resolvectl",
            args: &["status", "--no-pager"],
            payload_key: "dns_servers",
        }
    }

    pub fn active_connections() -> Self {
        Self {
            kind: ProbeKind::ActiveConnections,
            program: "ss",
            args: &["-tunap"],
            payload_key: "connections",
        }
    }

    async fn capture(&self, timeout: Duration) -> ProbeResult {
        run_command(self.kind, self.program, self.args, self.payload_key, timeout).await
    }
}

#[async_trait]
impl Probe for CommandProbe {
    fn kind(&self) -> ProbeKind {
        self.kind
    }

    async fn run(&self, timeout: Duration) -> ProbeResult {
        self.capture(timeout).await
    }
}

/// Recent warning-and-above journal entries, bounded in count and age.
pub struct SystemEventsProbe {
    max_entries: &'static str,
    since: &'static str,
}

impl SystemEventsProbe {
    pub fn new() -> Self {
        Self {
            max_entries: "50",
            since: "-5 minutes",
        }
    }
}

impl Default for SystemEventsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for SystemEventsProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::SystemEvents
    }

    async fn run(&self, timeout: Duration) -> ProbeResult {
        let args = [
            "-p",
            "warning",
            "--since",
            self.since,
            "-o",
            "json",
            "-n",
            self.max_entries,
            "--no-pager",
        ];
        run_command(self.kind(), "journalctl", &args, "system_events", timeout).await
    }
}

async fn run_command(
    kind: ProbeKind,
    program: &str,
    args: &[&str],
    payload_key: &str,
    timeout: Duration,
) -> ProbeResult {
    let start = Instant::now();

    let child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return ProbeResult::failed(
                kind,
                ProbeErrorKind::NotApplicable,
                format!("{program} not available on this host"),
                start.elapsed(),
            )
        }
        Ok(Err(e)) => {
            return ProbeResult::failed(
                kind,
                ProbeErrorKind::Exception,
                format!("failed to run {program}: {e}"),
                start.elapsed(),
            )
        }
        Err(_) => return ProbeResult::timed_out(kind, timeout),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return ProbeResult::failed(
            kind,
            ProbeErrorKind::Exception,
            format!("{program} exited {}: {}", output.status, stderr.trim()),
            start.elapsed(),
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    ProbeResult::ok(kind, json!({ payload_key: stdout }), start.elapsed())
}
