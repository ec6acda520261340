//! Configuration for the sentinel daemon.
//!
//! Loads settings from /etc/sentinel/config.toml (overridable via
//! $SENTINEL_CONFIG) or uses defaults. Every field has a serde default so a
//! partial file is fine; a file that exists but does not parse is the one
//! fatal startup condition.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default config file path
pub const CONFIG_PATH: &str = "/etc/sentinel/config.toml";

/// Environment variable overriding the config file path
pub const CONFIG_ENV: &str = "SENTINEL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Directory for the database and report bundles
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database path; defaults to <data_dir>/sentinel.db when empty
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Process name of the watched agent
    #[serde(default = "default_agent_process")]
    pub agent_process: String,

    /// Systemd unit restarted on recovery
    #[serde(default = "default_agent_unit")]
    pub agent_unit: String,

    /// Seconds between routine checks
    #[serde(default = "default_routine_interval")]
    pub routine_interval_secs: u64,

    /// Per-probe timeout for routine checks
    #[serde(default = "default_routine_timeout")]
    pub routine_timeout_secs: u64,

    /// Per-probe timeout for deep checks
    #[serde(default = "default_deep_timeout")]
    pub deep_timeout_secs: u64,

    /// Bounded window to confirm the process came back after a restart
    #[serde(default = "default_restart_wait")]
    pub restart_wait_secs: u64,

    /// Consecutive failed restarts that trip the breaker
    #[serde(default = "default_restart_failure_threshold")]
    pub restart_failure_threshold: u32,

    /// Master switch for automatic restarts
    #[serde(default = "default_auto_restart")]
    pub auto_restart_enabled: bool,

    /// Evaluate and log recovery actions without executing them
    #[serde(default)]
    pub dry_run: bool,

    /// Seconds between report bundles
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Monitored services, host[:port] or full URLs
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// Endpoint for the raw internet-reachability probe
    #[serde(default = "default_internet_endpoint")]
    pub internet_check_endpoint: String,

    /// Domain resolved by the DNS probe
    #[serde(default = "default_dns_domain")]
    pub dns_check_domain: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/sentinel")
}

fn default_agent_process() -> String {
    "netbird".to_string()
}

fn default_agent_unit() -> String {
    "netbird".to_string()
}

fn default_routine_interval() -> u64 {
    60
}

fn default_routine_timeout() -> u64 {
    5
}

fn default_deep_timeout() -> u64 {
    30
}

fn default_restart_wait() -> u64 {
    30
}

fn default_restart_failure_threshold() -> u32 {
    3
}

fn default_auto_restart() -> bool {
    true
}

fn default_report_interval() -> u64 {
    6 * 60 * 60
}

fn default_services() -> Vec<String> {
    vec![
        "gitea.netbird.cloud:3000".to_string(),
        "pve4.netbird.cloud".to_string(),
        "caddy.netbird.cloud".to_string(),
    ]
}

fn default_internet_endpoint() -> String {
    "8.8.8.8:53".to_string()
}

fn default_dns_domain() -> String {
    "google.com".to_string()
}

impl Default for SentinelConfig {
    fn default() -> Self {
        // A missing file deserializes every field to its default.
        toml::from_str("").unwrap_or_else(|_| unreachable!("empty config always parses"))
    }
}

impl SentinelConfig {
    /// Load from the default location, honoring $SENTINEL_CONFIG.
    ///
    /// A missing file yields defaults; an unparseable file is fatal.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;

        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("sentinel.db"))
    }

    pub fn report_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    pub fn routine_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.routine_timeout_secs)
    }

    pub fn deep_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.deep_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SentinelConfig::default();
        assert_eq!(config.routine_interval_secs, 60);
        assert_eq!(config.routine_timeout_secs, 5);
        assert_eq!(config.deep_timeout_secs, 30);
        assert_eq!(config.restart_failure_threshold, 3);
        assert!(config.auto_restart_enabled);
        assert!(!config.dry_run);
        assert_eq!(config.services.len(), 3);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: SentinelConfig = toml::from_str(
            r#"
            agent_process = "tailscaled"
            routine_interval_secs = 30
            services = ["hq.example.net"]
            "#,
        )
        .unwrap();

        assert_eq!(config.agent_process, "tailscaled");
        assert_eq!(config.routine_interval_secs, 30);
        assert_eq!(config.services, vec!["hq.example.net".to_string()]);
        // untouched fields keep defaults
        assert_eq!(config.deep_timeout_secs, 30);
        assert!(config.auto_restart_enabled);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "routine_interval_secs = \"not a number\"").unwrap();
        assert!(SentinelConfig::load_from(&path).is_err());
    }

    #[test]
    fn missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SentinelConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.agent_process, "netbird");
    }

    #[test]
    fn db_path_falls_back_to_data_dir() {
        let config = SentinelConfig::default();
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/sentinel/sentinel.db"));
    }
}
