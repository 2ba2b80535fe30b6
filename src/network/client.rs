//! SPV Client Facade
//!
//! The stable API surface consumed by wallet-level code. Every domain
//! operation is a thin wrapper over a generic `rpc` call against whichever
//! session is currently active. The facade is fail-fast: with no usable
//! session it errors immediately instead of queueing. Callers wanting
//! retry-across-reconnect semantics build their own loop on top.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{NetworkConfig, ServerAddress};
use crate::error::NetworkError;
use crate::network::manager::{ConnectionManager, ConnectionState};
use crate::network::router::{SubscriptionRouter, Topic};

/// Header batch size requested when the caller does not care.
pub const DEFAULT_HEADER_BATCH: u64 = 10_000;

pub struct SpvClient {
    manager: Arc<ConnectionManager>,
    router: Arc<SubscriptionRouter>,
}

impl SpvClient {
    pub fn new(config: NetworkConfig) -> Self {
        let router = Arc::new(SubscriptionRouter::new(config.subscription_buffer));
        let manager = Arc::new(ConnectionManager::new(config, router.clone()));
        Self { manager, router }
    }

    pub async fn start(&self) {
        self.manager.start().await;
    }

    pub async fn stop(&self) {
        self.manager.stop().await;
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Generic RPC call against the active session.
    pub async fn rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, NetworkError> {
        let session = self
            .manager
            .active_session()
            .ok_or(NetworkError::NotConnected)?;
        session.send_request(method, params).await
    }

    pub async fn broadcast_transaction(&self, raw_transaction: &str) -> Result<Value, NetworkError> {
        self.rpc("blockchain.transaction.broadcast", vec![json!(raw_transaction)])
            .await
    }

    pub async fn get_transaction(&self, tx_hash: &str) -> Result<Value, NetworkError> {
        self.rpc("blockchain.transaction.get", vec![json!(tx_hash)])
            .await
    }

    pub async fn get_merkle(&self, tx_hash: &str, height: u64) -> Result<Value, NetworkError> {
        self.rpc(
            "blockchain.transaction.get_merkle",
            vec![json!(tx_hash), json!(height)],
        )
        .await
    }

    pub async fn get_headers(&self, start_height: u64, count: u64) -> Result<Value, NetworkError> {
        self.rpc(
            "blockchain.block.headers",
            vec![json!(start_height), json!(count)],
        )
        .await
    }

    pub async fn get_history(&self, address: &str) -> Result<Value, NetworkError> {
        self.rpc("blockchain.address.get_history", vec![json!(address)])
            .await
    }

    /// Ask the server to start pushing new chain tips. The reply is the
    /// current tip; subsequent tips arrive on `headers()`.
    pub async fn subscribe_headers(&self) -> Result<Value, NetworkError> {
        self.rpc("blockchain.headers.subscribe", vec![json!(true)])
            .await
    }

    /// Ask the server to start pushing status changes for one address.
    /// Changes arrive on `address_status()`.
    pub async fn subscribe_address(&self, address: &str) -> Result<Value, NetworkError> {
        self.rpc("blockchain.address.subscribe", vec![json!(address)])
            .await
    }

    /// Stream of new-header notifications.
    pub fn headers(&self) -> broadcast::Receiver<Vec<Value>> {
        self.router.subscribe(Topic::Headers)
    }

    /// Stream of address status-change notifications.
    pub fn address_status(&self) -> broadcast::Receiver<Vec<Value>> {
        self.router.subscribe(Topic::AddressStatus)
    }

    /// Fires the server address after each successful connect + handshake.
    /// Subscriptions do not survive a reconnect; consumers typically
    /// re-issue their subscribe calls on each event.
    pub fn on_connected(&self) -> broadcast::Receiver<ServerAddress> {
        self.manager.on_connected()
    }
}
