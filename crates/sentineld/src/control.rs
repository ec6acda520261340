//! Control socket server.
//!
//! Accepts sentinelctl connections on the Unix socket and forwards each
//! request into the scheduler loop over a channel. Handlers never touch
//! daemon state themselves; the loop answers through a oneshot.

use crate::daemon::ControlCommand;
use anyhow::{Context, Result};
use sentinel_common::control::{socket_path, ControlRequest, ControlResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub fn bind() -> Result<UnixListener> {
    let path = socket_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    // A stale socket from an unclean shutdown blocks the bind.
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("failed to bind control socket {}", path.display()))?;
    info!(path = %path.display(), "control socket listening");
    Ok(listener)
}

pub async fn serve(listener: UnixListener, tx: mpsc::Sender<ControlCommand>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, tx).await {
                        debug!(error = %e, "control client error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "control socket accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_client(stream: UnixStream, tx: mpsc::Sender<ControlCommand>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();

    let mut line = String::new();
    BufReader::new(read_half)
        .read_line(&mut line)
        .await
        .context("failed to read request line")?;

    let response = match serde_json::from_str::<ControlRequest>(&line) {
        Ok(request) => forward(request, &tx).await,
        Err(e) => ControlResponse::Error {
            message: format!("malformed request: {e}"),
        },
    };

    let mut out = serde_json::to_string(&response)?;
    out.push('\n');
    write_half
        .write_all(out.as_bytes())
        .await
        .context("failed to write response")?;
    Ok(())
}

async fn forward(request: ControlRequest, tx: &mpsc::Sender<ControlCommand>) -> ControlResponse {
    let (reply_tx, reply_rx) = oneshot::channel();
    let command = ControlCommand {
        request,
        reply: reply_tx,
    };
    if tx.send(command).await.is_err() {
        return ControlResponse::Error {
            message: "daemon is shutting down".to_string(),
        };
    }
    match reply_rx.await {
        Ok(response) => response,
        Err(_) => ControlResponse::Error {
            message: "daemon dropped the request".to_string(),
        },
    }
}

/// Best-effort socket removal on shutdown.
pub fn cleanup() {
    let _ = std::fs::remove_file(socket_path());
}
