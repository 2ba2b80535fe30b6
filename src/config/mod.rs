//! Configuration module
//!
//! Handles loading and validation of the application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.network.servers.is_empty(),
            "server pool must contain at least one entry"
        );
        anyhow::ensure!(
            self.network.servers.iter().all(|s| s.port != 0),
            "server port must be nonzero"
        );
        anyhow::ensure!(
            !self.network.protocol_version.is_empty(),
            "protocol_version must not be empty"
        );
        anyhow::ensure!(
            self.network.connect_timeout_ms > 0,
            "connect_timeout_ms must be positive"
        );
        anyhow::ensure!(
            self.network.subscription_buffer > 0,
            "subscription_buffer must be positive"
        );
        Ok(())
    }

    /// Create a default config for testing
    #[cfg(test)]
    pub fn default_for_test() -> Self {
        Self {
            network: NetworkConfig {
                servers: vec![ServerAddress {
                    host: "127.0.0.1".to_string(),
                    port: 50001,
                }],
                protocol_version: "1.2".to_string(),
                connect_timeout_ms: 5000,
                subscription_buffer: 1024,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                json_logs: false,
                log_file: None,
                metrics_port: 9090,
                enable_metrics: false,
            },
        }
    }
}

/// One server in the failover pool, tried in order and cyclically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ordered server pool; the failover loop cycles through it indefinitely.
    pub servers: Vec<ServerAddress>,
    /// Minimum protocol version accepted during the handshake.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Capacity of each subscription broadcast channel.
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
}

fn default_protocol_version() -> String { "1.2".to_string() }
fn default_connect_timeout() -> u64 { 5000 }
fn default_subscription_buffer() -> usize { 1024 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    pub log_file: Option<String>,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }
