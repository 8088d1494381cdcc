//! ParkFlow Node - real-time dashboard server.

use anyhow::Context;
use clap::Parser;
use parkflow_node::observability::{init_logging, LogFormat};
use parkflow_node::{Node, NodeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// ParkFlow Node - real-time parking dashboard updates
#[derive(Parser, Debug)]
#[command(name = "parkflow-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Publish simulated occupancy updates
    #[arg(long)]
    simulate: bool,
}

impl Args {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(addr) = self.listen_addr {
            config.server.listen_addr = addr;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        if self.simulate {
            config.simulator.enabled = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config =
        NodeConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.check().context("invalid configuration")?;

    init_logging(
        &config.logging.level,
        LogFormat::parse(&config.logging.format),
    );

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ParkFlow node");
    tracing::info!(
        listen_addr = %config.server.listen_addr,
        heartbeat_interval_seconds = config.hub.heartbeat_interval_seconds,
        heartbeat_timeout_seconds = config.hub.heartbeat_timeout_seconds,
        simulator = config.simulator.enabled,
        "Node configuration"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let node = Node::new(config);
    let listener = node.bind().await?;
    node.serve(listener, shutdown).await?;

    tracing::info!("ParkFlow node stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
