//! Process lifecycle helpers

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Block until SIGTERM or SIGINT arrives, returning the signal name
pub async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    debug!(signal = name, "shutdown signal received");
    Ok(name)
}

/// Stream of SIGHUP deliveries, used to reapply tuning from the environment
pub fn hangup_stream() -> Result<Signal> {
    signal(SignalKind::hangup()).context("failed to register SIGHUP handler")
}
