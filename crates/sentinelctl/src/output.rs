//! Terminal output formatting. ASCII only, no emojis.

use owo_colors::OwoColorize;
use sentinel_common::{
    BreakerMode, DaemonStatus, FailureSummary, HealthCheckSummary, HealthStatus,
};

pub fn info(message: &str) {
    println!("[INFO] {}", message);
}

pub fn success(message: &str) {
    println!("[OK] {}", message.green());
}

pub fn error(message: &str) {
    eprintln!("[ERROR] {}", message.red());
}

fn colored_status(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "healthy".bright_green().to_string(),
        HealthStatus::Degraded => "degraded".yellow().to_string(),
        HealthStatus::Failed => "failed".bright_red().to_string(),
    }
}

pub fn daemon_status(status: &DaemonStatus) {
    println!();
    println!("sentineld v{}  (pid {})", status.version, status.pid);
    println!("  uptime:        {}s", status.uptime_secs);
    println!("  checks run:    {}", status.checks_run);
    match status.last_status {
        Some(s) => println!("  agent status:  {}", colored_status(s)),
        None => println!("  agent status:  {}", "not yet checked".dimmed()),
    }
    if let Some(last) = status.last_check {
        println!("  last check:    {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    let breaker = match status.breaker_mode {
        BreakerMode::Armed => "armed".green().to_string(),
        BreakerMode::Disabled => "DISABLED - manual reset required".bright_red().to_string(),
    };
    println!(
        "  breaker:       {} ({}/{} consecutive failures)",
        breaker, status.consecutive_restart_failures, status.restart_failure_threshold
    );
    println!(
        "  auto-restart:  {}",
        if status.auto_restart_enabled { "enabled" } else { "disabled" }
    );
    if status.dry_run {
        println!("  mode:          {}", "dry-run".yellow());
    }
    if status.recovery_in_flight {
        println!("  recovery:      {}", "in progress".yellow());
    }
    println!();
}

pub fn check_result(status: HealthStatus, summary: &HealthCheckSummary) {
    println!();
    println!("status: {}", colored_status(status));
    match summary.agent_running {
        Some(true) => {
            let pid = summary
                .agent_pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("  agent process:  running (pid {})", pid);
        }
        Some(false) => println!("  agent process:  {}", "not running".bright_red()),
        None => println!("  agent process:  {}", "unknown".yellow()),
    }
    print_flag("internet", summary.internet_reachable);
    print_flag("dns", summary.dns_working);

    if let Some(services) = summary.services_status.as_object() {
        println!("  services:");
        for (name, entry) in services {
            let reachable = entry
                .get("reachable")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            let mark = if reachable {
                "ok".green().to_string()
            } else {
                "unreachable".bright_red().to_string()
            };
            println!("    {:30} {}", name, mark);
        }
    }
    println!("  duration: {}ms", summary.duration_ms);
    println!();
}

fn print_flag(label: &str, value: Option<bool>) {
    let text = match value {
        Some(true) => "ok".green().to_string(),
        Some(false) => "failing".bright_red().to_string(),
        None => "unknown".yellow().to_string(),
    };
    println!("  {:15} {}", format!("{label}:"), text);
}

pub fn failures(failures: &[FailureSummary]) {
    if failures.is_empty() {
        println!("[OK] no failures recorded");
        return;
    }
    println!();
    for f in failures {
        let outcome = match (f.auto_restart_attempted, f.restart_successful) {
            (_, Some(true)) => "recovered".green().to_string(),
            (_, Some(false)) => "restart failed".bright_red().to_string(),
            (false, None) => "no restart attempted".yellow().to_string(),
            (true, None) => "outcome unknown".yellow().to_string(),
        };
        println!(
            "{}  {}  [{}]  {}",
            f.timestamp.format("%Y-%m-%d %H:%M:%S"),
            f.failure_type,
            f.severity,
            outcome
        );
        if let Some(notes) = &f.notes {
            println!("    {}", notes.dimmed());
        }
    }
    println!();
}
