//! SPV Client Daemon
//!
//! Maintains a connection to an SPV wallet server pool, resubscribes to
//! chain-tip notifications after every reconnect, and logs new tips as
//! they arrive.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod config;
mod error;
mod network;
mod telemetry;

use config::{AppConfig, ServerAddress};
use network::SpvClient;
use telemetry::{init_logging, init_metrics};

/// SPV wallet network client with automatic server failover
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the configured server pool (host:port, repeatable)
    #[arg(short, long)]
    server: Vec<String>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_server(value: &str) -> Result<ServerAddress> {
    let (host, port) = value
        .rsplit_once(':')
        .with_context(|| format!("server '{}' is not host:port", value))?;
    Ok(ServerAddress {
        host: host.to_string(),
        port: port
            .parse()
            .with_context(|| format!("invalid port in server '{}'", value))?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;

    // Apply CLI overrides
    if !args.server.is_empty() {
        config.network.servers = args
            .server
            .iter()
            .map(|s| parse_server(s))
            .collect::<Result<Vec<_>>>()?;
    }
    if let Some(level) = args.log_level {
        config.telemetry.log_level = level;
    }

    let _log_guard = init_logging(&config.telemetry)?;

    info!("Starting SPV client v{}", env!("CARGO_PKG_VERSION"));
    info!("Server pool: {} entries", config.network.servers.len());

    if config.telemetry.enable_metrics {
        init_metrics(config.telemetry.metrics_port)?;
    }

    let client = Arc::new(SpvClient::new(config.network.clone()));

    let mut connected = client.on_connected();
    let mut headers = client.headers();
    client.start().await;

    // Subscriptions do not survive a reconnect, so re-issue the header
    // subscription after every successful handshake.
    let subscriber = client.clone();
    tokio::spawn(async move {
        loop {
            match connected.recv().await {
                Ok(addr) => match subscriber.subscribe_headers().await {
                    Ok(tip) => info!("Subscribed to headers on {}, current tip: {}", addr, tip),
                    Err(e) => warn!("Header subscription on {} failed: {}", addr, e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} connected events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match headers.recv().await {
                Ok(params) => {
                    if let Some(tip) = params.first() {
                        info!("New chain tip: {}", tip);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Header stream lagged by {} notifications", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, gracefully stopping...");
        }
        Err(err) => {
            error!("Error listening for shutdown signal: {}", err);
        }
    }

    client.stop().await;
    info!("SPV client stopped");
    Ok(())
}
