//! xcvr agent: opens a session to one transceiver, runs the configured
//! command script and optionally keeps polling device health.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use xcvr_agent::config::AgentConfig;
use xcvr_agent::monitor;
use xcvr_agent::runner::ScriptRunner;
use xcvr_device::{DeviceSession, TcpConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "xcvr-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/xcvr/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    tracing::info!(
        device_addr = %config.device_addr,
        steps = config.steps.len(),
        "config loaded"
    );

    // ── Open session ────────────────────────────────────────────
    let connector = TcpConnector::new(
        config.device_addr.clone(),
        Duration::from_millis(config.connect_timeout_ms),
    );
    let session = DeviceSession::open(&connector, config.session.clone()).await?;

    // ── Run script ──────────────────────────────────────────────
    let report = ScriptRunner::new(&session).run(&config.steps).await;
    tracing::info!(report = %serde_json::to_string(&report)?, "script finished");

    if let Some(failed) = report.failed_step() {
        session.close().await?;
        anyhow::bail!(
            "step {} ({}) failed: {}",
            failed.index,
            failed.step,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }

    // ── Health monitor ──────────────────────────────────────────
    if config.health_interval_secs > 0 {
        tokio::select! {
            () = monitor::run(&session, Duration::from_secs(config.health_interval_secs)) => {
                tracing::error!("health monitor exited");
            }
            () = shutdown_signal() => {
                tracing::info!("shutdown signal received");
            }
        }
    }

    session.close().await?;
    tracing::info!("xcvr-agent stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    tokio::select! {
        () = ctrl_c() => {}
        () = terminate() => {}
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
