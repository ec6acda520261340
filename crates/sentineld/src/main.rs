use anyhow::Result;
use sentinel_common::{SentinelConfig, SentinelDb};
use sentineld::control;
use sentineld::daemon::Daemon;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "sentineld starting");

    let config = SentinelConfig::load()?;
    let db = SentinelDb::open_at(config.db_path())?;

    let listener = control::bind()?;
    let (control_tx, control_rx) = mpsc::channel(16);
    tokio::spawn(control::serve(listener, control_tx));

    let result = Daemon::new(config, db).run(control_rx).await;

    control::cleanup();
    info!("sentineld stopped");
    result
}
