//! Diagnostic probes.
//!
//! Each probe is one external diagnostic operation behind the `Probe`
//! trait: it gets a timeout, returns a structured `ProbeResult`, and never
//! propagates an error to the caller. Negative findings (process absent,
//! host unreachable) are successful probe runs; `success: false` means the
//! probe itself broke.
//!
//! The collector owns the hard timeout; probes receive it so they can bound
//! their own internal operations as well.

mod deep;
mod network;
mod process;

pub use deep::{CommandProbe, SystemEventsProbe};
pub use network::{DnsProbe, InternetProbe, ServicesProbe};
pub use process::ProcessProbe;

use async_trait::async_trait;
use sentinel_common::{ProbeKind, ProbeResult, SentinelConfig};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    async fn run(&self, timeout: Duration) -> ProbeResult;
}

/// The short-timeout probe set run on every routine check.
pub fn routine_set(config: &SentinelConfig) -> Vec<Arc<dyn Probe>> {
    vec![
        Arc::new(ProcessProbe::new(&config.agent_process)),
        Arc::new(InternetProbe::new(&config.internet_check_endpoint)),
        Arc::new(DnsProbe::new(&config.dns_check_domain)),
        Arc::new(ServicesProbe::new(config.services.clone())),
    ]
}

/// The long-timeout probe set run when a failure is suspected.
pub fn deep_set(_config: &SentinelConfig) -> Vec<Arc<dyn Probe>> {
    vec![
        Arc::new(CommandProbe::adapters()),
        Arc::new(CommandProbe::routing_table()),
        Arc::new(CommandProbe::dns_servers()),
        Arc::new(CommandProbe::active_connections()),
        Arc::new(SystemEventsProbe::new()),
    ]
}

/// Scriptable probe for deterministic tests: fixed payload, optional delay.
///
/// No system calls, same interface as the real probes.
pub struct FakeProbe {
    kind: ProbeKind,
    delay: Duration,
    outcome: FakeOutcome,
}

enum FakeOutcome {
    Ok(serde_json::Value),
    Error(String),
    /// Never completes; the collector's timeout has to cut it off.
    Hang,
}

impl FakeProbe {
    pub fn ok(kind: ProbeKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            delay: Duration::ZERO,
            outcome: FakeOutcome::Ok(data),
        }
    }

    pub fn erroring(kind: ProbeKind, message: &str) -> Self {
        Self {
            kind,
            delay: Duration::ZERO,
            outcome: FakeOutcome::Error(message.to_string()),
        }
    }

    pub fn hanging(kind: ProbeKind) -> Self {
        Self {
            kind,
            delay: Duration::ZERO,
            outcome: FakeOutcome::Hang,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Probe for FakeProbe {
    fn kind(&self) -> ProbeKind {
        self.kind
    }

    async fn run(&self, _timeout: Duration) -> ProbeResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.outcome {
            FakeOutcome::Ok(data) => ProbeResult::ok(self.kind, data.clone(), self.delay),
            FakeOutcome::Error(message) => ProbeResult::failed(
                self.kind,
                sentinel_common::ProbeErrorKind::Exception,
                message.clone(),
                self.delay,
            ),
            FakeOutcome::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }
}
