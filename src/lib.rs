//! SPV Network Client Library
//!
//! A lightweight client for SPV wallet servers: maintains a connection to
//! one server from a configured pool with automatic failover, issues
//! blockchain queries over JSON-RPC, and distributes server-pushed
//! notifications to subscribers.

pub mod config;
pub mod error;
pub mod network;
pub mod telemetry;

// Re-export main types
pub use config::{AppConfig, NetworkConfig, ServerAddress};
pub use error::NetworkError;
pub use network::{ConnectionManager, ConnectionState, Session, SpvClient, SubscriptionRouter, Topic};
