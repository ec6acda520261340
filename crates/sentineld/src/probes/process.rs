//! Process-status probe for the watched agent.

use super::Probe;
use async_trait::async_trait;
use sentinel_common::{ProbeErrorKind, ProbeKind, ProbeResult};
use serde_json::json;
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, RefreshKind, System};

pub struct ProcessProbe {
    process_name: String,
}

impl ProcessProbe {
    pub fn new(process_name: &str) -> Self {
        Self {
            process_name: process_name.to_lowercase(),
        }
    }
}

#[async_trait]
impl Probe for ProcessProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::ProcessStatus
    }

    async fn run(&self, _timeout: Duration) -> ProbeResult {
        let start = Instant::now();
        let name = self.process_name.clone();

        // sysinfo scans /proc synchronously; keep it off the runtime.
        let scan = tokio::task::spawn_blocking(move || {
            let sys = System::new_with_specifics(
                RefreshKind::new().with_processes(ProcessRefreshKind::everything()),
            );

            for process in sys.processes().values() {
                if process.name().to_lowercase().contains(&name) {
                    return json!({
                        "running": true,
                        "pid": process.pid().as_u32(),
                        "uptime_seconds": process.run_time(),
                        "cpu_percent": process.cpu_usage(),
                        "memory_mb": process.memory() as f64 / (1024.0 * 1024.0),
                    });
                }
            }

            json!({
                "running": false,
                "pid": null,
                "uptime_seconds": null,
                "cpu_percent": null,
                "memory_mb": null,
            })
        })
        .await;

        match scan {
            Ok(data) => ProbeResult::ok(self.kind(), data, start.elapsed()),
            Err(e) => ProbeResult::failed(
                self.kind(),
                ProbeErrorKind::Exception,
                format!("process scan panicked: {e}"),
                start.elapsed(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_process_is_a_successful_negative_result() {
        let probe = ProcessProbe::new("definitely-not-a-real-process-name");
        let result = probe.run(Duration::from_secs(5)).await;

        assert!(result.success);
        assert_eq!(result.data["running"], serde_json::json!(false));
        assert!(result.data["pid"].is_null());
    }

    #[tokio::test]
    async fn present_process_reports_pid_and_uptime() {
        // The test runner process itself is always present. Kernel comm
        // names are truncated to 15 bytes, so match on a short prefix.
        let current = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "cargo".to_string());
        let prefix: String = current.chars().take(8).collect();

        let probe = ProcessProbe::new(&prefix);
        let result = probe.run(Duration::from_secs(5)).await;

        assert!(result.success);
        assert_eq!(result.data["running"], serde_json::json!(true));
        assert!(result.data["pid"].as_u64().is_some());
    }
}
