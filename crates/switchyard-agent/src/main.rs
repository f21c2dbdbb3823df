//! # switchyard-agent
//!
//! Router binary: loads settings, starts a [`Switchyard`] with an in-memory
//! session store and channel transport, and serves `/health` and `/metrics`
//! until Ctrl-C.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchyard_server::{
    AdminServer, ChannelTransport, InMemorySessionStore, RouterConfig, Switchyard,
};
use switchyard_settings::SwitchyardSettings;
use tokio_util::sync::CancellationToken;

/// Switchyard connection/session router.
#[derive(Parser, Debug)]
#[command(name = "switchyard-agent", about = "Switchyard connection/session router")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.switchyard/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn bind_addr(&self, settings: &SwitchyardSettings) -> Result<SocketAddr> {
        let host = self.host.as_deref().unwrap_or(&settings.server.host);
        let port = self.port.unwrap_or(settings.server.port);
        format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid bind address {host}:{port}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(switchyard_settings::settings_path);
    let settings = switchyard_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    switchyard_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics = switchyard_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let addr = cli.bind_addr(&settings)?;
    let config = RouterConfig::from(&settings);
    tracing::info!(path = %settings_path.display(), ?config, "settings loaded");

    let switchyard = Arc::new(Switchyard::new(
        config,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(ChannelTransport::new()),
    ));
    switchyard
        .initialize()
        .context("Failed to start event processing")?;

    let cancel = CancellationToken::new();
    let admin = AdminServer::new(switchyard.clone(), Some(metrics));
    let mut server = {
        let cancel = cancel.clone();
        tokio::spawn(async move { admin.serve(addr, cancel).await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("Shutting down...");
        }
        result = &mut server => {
            tracing::error!(?result, "admin server exited early");
        }
    }
    cancel.cancel();

    let report = switchyard.shutdown().await.context("Router shutdown failed")?;
    if !server.is_finished() {
        let _ = server.await;
    }

    tracing::info!(
        connections_closed = report.connections_closed,
        sessions_summarized = report.sessions_summarized,
        "Shutdown complete"
    );
    Ok(())
}
