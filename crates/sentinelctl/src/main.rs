//! sentinelctl - CLI client for the sentinel daemon.
//!
//! Talks to sentineld over its Unix control socket. The failures query
//! falls back to reading the database directly when the daemon is down,
//! so history stays inspectable during an outage.

mod output;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sentinel_common::control::{send_request, ControlRequest, ControlResponse};
use sentinel_common::{FailureSummary, SentinelConfig, SentinelDb};

#[derive(Parser)]
#[command(name = "sentinelctl")]
#[command(about = "Control client for the sentinel monitoring daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status and breaker state
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Run an immediate health check and show the result
    Check,

    /// Restart the agent now, bypassing the breaker
    Restart,

    /// Re-arm the restart breaker after investigating
    ResetBreaker,

    /// Show recent failure records
    Failures {
        /// Maximum number of records
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Generate a report bundle immediately
    Report,

    /// Ping daemon (hidden - for health checks only)
    #[command(hide = true)]
    Ping,

    /// Stop the daemon (hidden - prefer systemctl stop)
    #[command(hide = true)]
    Shutdown,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        output::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Status { json } => status(json),
        Commands::Check => check(),
        Commands::Restart => simple(ControlRequest::RestartNow),
        Commands::ResetBreaker => simple(ControlRequest::ResetBreaker),
        Commands::Failures { limit } => failures(limit),
        Commands::Report => report(),
        Commands::Ping => ping(),
        Commands::Shutdown => simple(ControlRequest::Shutdown),
    }
}

fn status(json: bool) -> Result<()> {
    match send_request(&ControlRequest::Status)? {
        ControlResponse::Status(status) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                output::daemon_status(&status);
            }
            Ok(())
        }
        other => unexpected(other),
    }
}

fn check() -> Result<()> {
    output::info("running health check...");
    match send_request(&ControlRequest::ForceCheck)? {
        ControlResponse::Check { status, summary } => {
            output::check_result(status, &summary);
            Ok(())
        }
        other => unexpected(other),
    }
}

fn simple(request: ControlRequest) -> Result<()> {
    match send_request(&request)? {
        ControlResponse::Ok { message } => {
            output::success(&message);
            Ok(())
        }
        other => unexpected(other),
    }
}

fn failures(limit: usize) -> Result<()> {
    match send_request(&ControlRequest::RecentFailures { limit }) {
        Ok(ControlResponse::Failures { failures }) => {
            output::failures(&failures);
            Ok(())
        }
        Ok(other) => unexpected(other),
        // Daemon down: read the database directly.
        Err(_) => failures_offline(limit),
    }
}

fn failures_offline(limit: usize) -> Result<()> {
    let config = SentinelConfig::load()?;
    let Some(db) = SentinelDb::open_readonly(config.db_path()) else {
        bail!(
            "daemon not reachable and no database at {}",
            config.db_path().display()
        );
    };
    output::info("daemon not reachable, reading stored history");
    let records = db.recent_failures(limit)?;
    let summaries: Vec<FailureSummary> = records.iter().map(FailureSummary::from).collect();
    output::failures(&summaries);
    Ok(())
}

fn report() -> Result<()> {
    output::info("generating report...");
    match send_request(&ControlRequest::Report)? {
        ControlResponse::Report { path } => {
            output::success(&format!("report written to {}", path.display()));
            Ok(())
        }
        other => unexpected(other),
    }
}

fn ping() -> Result<()> {
    match send_request(&ControlRequest::Ping)? {
        ControlResponse::Pong => {
            println!("pong");
            Ok(())
        }
        other => unexpected(other),
    }
}

fn unexpected(response: ControlResponse) -> Result<()> {
    match response {
        ControlResponse::Error { message } => bail!("daemon error: {message}"),
        other => bail!("unexpected response: {other:?}"),
    }
}
