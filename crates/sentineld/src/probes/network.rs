//! Routine network reachability probes: raw internet, DNS, and the
//! configured per-service HTTP checks.

use super::Probe;
use async_trait::async_trait;
use sentinel_common::{ProbeErrorKind, ProbeKind, ProbeResult};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// TCP connect to a well-known endpoint, bypassing DNS.
pub struct InternetProbe {
    endpoint: String,
}

impl InternetProbe {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Probe for InternetProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Internet
    }

    async fn run(&self, timeout: Duration) -> ProbeResult {
        let start = Instant::now();
        let connect = tokio::net::TcpStream::connect(&self.endpoint);

        let data = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(_stream)) => json!({
                "internet_reachable": true,
                "latency_ms": start.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => json!({
                "internet_reachable": false,
                "latency_ms": null,
                "error": e.to_string(),
            }),
            Err(_) => json!({
                "internet_reachable": false,
                "latency_ms": null,
                "error": format!("connect to {} timed out", self.endpoint),
            }),
        };

        ProbeResult::ok(self.kind(), data, start.elapsed())
    }
}

/// Resolve a check domain through the system resolver.
pub struct DnsProbe {
    domain: String,
}

impl DnsProbe {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
        }
    }
}

#[async_trait]
impl Probe for DnsProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::DnsResolution
    }

    async fn run(&self, timeout: Duration) -> ProbeResult {
        let start = Instant::now();
        let lookup = tokio::net::lookup_host((self.domain.as_str(), 80));

        let data = match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(mut addrs)) => match addrs.next() {
                Some(addr) => json!({
                    "dns_working": true,
                    "resolved_ip": addr.ip().to_string(),
                    "latency_ms": start.elapsed().as_millis() as u64,
                }),
                None => json!({
                    "dns_working": false,
                    "resolved_ip": null,
                    "latency_ms": null,
                    "error": format!("{} resolved to no addresses", self.domain),
                }),
            },
            Ok(Err(e)) => json!({
                "dns_working": false,
                "resolved_ip": null,
                "latency_ms": null,
                "error": e.to_string(),
            }),
            Err(_) => json!({
                "dns_working": false,
                "resolved_ip": null,
                "latency_ms": null,
                "error": format!("resolution of {} timed out", self.domain),
            }),
        };

        ProbeResult::ok(self.kind(), data, start.elapsed())
    }
}

/// HTTP reachability for every configured service, checked concurrently.
pub struct ServicesProbe {
    services: Vec<String>,
}

impl ServicesProbe {
    pub fn new(services: Vec<String>) -> Self {
        Self { services }
    }

    fn service_url(service: &str) -> String {
        if service.contains("://") {
            service.to_string()
        } else {
            format!("http://{service}")
        }
    }
}

#[async_trait]
impl Probe for ServicesProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Services
    }

    async fn run(&self, timeout: Duration) -> ProbeResult {
        let start = Instant::now();

        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                return ProbeResult::failed(
                    self.kind(),
                    ProbeErrorKind::Exception,
                    format!("http client build failed: {e}"),
                    start.elapsed(),
                )
            }
        };

        let mut tasks = JoinSet::new();
        for service in &self.services {
            let client = client.clone();
            let service = service.clone();
            let url = Self::service_url(&service);
            tasks.spawn(async move {
                let began = Instant::now();
                let outcome = match client.get(&url).send().await {
                    Ok(response) => json!({
                        "reachable": response.status().is_success(),
                        "status_code": response.status().as_u16(),
                        "latency_ms": began.elapsed().as_millis() as u64,
                        "error": null,
                    }),
                    Err(e) => json!({
                        "reachable": false,
                        "status_code": null,
                        "latency_ms": null,
                        "error": e.to_string(),
                    }),
                };
                (service, outcome)
            });
        }

        let mut services = Map::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((service, outcome)) => {
                    services.insert(service, outcome);
                }
                Err(e) => {
                    return ProbeResult::failed(
                        self.kind(),
                        ProbeErrorKind::Exception,
                        format!("service check task failed: {e}"),
                        start.elapsed(),
                    )
                }
            }
        }

        ProbeResult::ok(
            self.kind(),
            json!({ "services": Value::Object(services) }),
            start.elapsed(),
        )
    }
}
