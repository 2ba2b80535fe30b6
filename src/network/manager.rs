//! Connection Manager
//!
//! Owns the single active session and runs the failover loop: cycle through
//! the configured server pool, connect, verify the protocol version, then
//! park until the session drops and move on to the next candidate. The loop
//! only ever terminates on an explicit stop request. There is no delay
//! between attempts; a fully failing pool is retried in a tight cycle
//! bounded by the per-attempt connect timeout.

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{NetworkConfig, ServerAddress};
use crate::error::NetworkError;
use crate::network::router::SubscriptionRouter;
use crate::network::session::Session;
use crate::telemetry::metrics::{
    record_connect_attempt, record_connect_failure, record_connection_status,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// User agent sent as the client identifier during the handshake.
const USER_AGENT: &str = concat!("spv-client/", env!("CARGO_PKG_VERSION"));

pub struct ConnectionManager {
    config: NetworkConfig,
    router: Arc<SubscriptionRouter>,
    session: Arc<ArcSwapOption<Session>>,
    state: Arc<RwLock<ConnectionState>>,
    connected_tx: broadcast::Sender<ServerAddress>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    started: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: NetworkConfig, router: Arc<SubscriptionRouter>) -> Self {
        let (connected_tx, _) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            router,
            session: Arc::new(ArcSwapOption::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected_tx,
            shutdown_tx,
            shutdown_rx,
            started: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        }
    }

    /// Spawn the failover loop. Calling start twice is a no-op; there is
    /// never more than one loop and therefore never more than one session.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let config = self.config.clone();
        let router = self.router.clone();
        let session_slot = self.session.clone();
        let state = self.state.clone();
        let connected_tx = self.connected_tx.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            if config.servers.is_empty() {
                warn!("Server pool is empty, nothing to connect to");
                return;
            }

            let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
            let mut index = 0usize;

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let addr = config.servers[index % config.servers.len()].clone();
                index = index.wrapping_add(1);

                *state.write() = ConnectionState::Connecting;
                record_connect_attempt();

                let attempt = tokio::select! {
                    result = Self::attempt(&addr, &config, &router, connect_timeout) => result,
                    _ = shutdown_rx.wait_for(|s| *s) => break,
                };

                match attempt {
                    Ok(session) => {
                        session_slot.store(Some(session.clone()));
                        *state.write() = ConnectionState::Connected;
                        record_connection_status(true);
                        info!("Connected to SPV server {}", addr);
                        let _ = connected_tx.send(addr.clone());

                        tokio::select! {
                            _ = session.closed() => {
                                warn!("Connection to {} lost", addr);
                            }
                            _ = async { let _ = shutdown_rx.wait_for(|s| *s).await; } => {
                                session.close();
                                session.closed().await;
                            }
                        }

                        session_slot.store(None);
                        record_connection_status(false);
                    }
                    Err(e) => {
                        record_connect_failure();
                        warn!("Connecting to {} failed: {}", addr, e);
                    }
                }
            }

            session_slot.store(None);
            *state.write() = ConnectionState::Disconnected;
            record_connection_status(false);
            info!("Failover loop stopped");
        });

        *self.loop_handle.lock() = Some(handle);
    }

    /// One connection attempt: transport connect plus the protocol-version
    /// handshake. A failed handshake fails this attempt only, and the
    /// half-open session is torn down before moving on.
    async fn attempt(
        addr: &ServerAddress,
        config: &NetworkConfig,
        router: &Arc<SubscriptionRouter>,
        connect_timeout: Duration,
    ) -> Result<Arc<Session>, NetworkError> {
        let session = Session::connect(addr, router.clone(), connect_timeout).await?;
        match Self::check_server_version(&session, addr, &config.protocol_version).await {
            Ok(protocol) => {
                info!("Server {} speaks protocol {}", addr, protocol);
                Ok(session)
            }
            Err(e) => {
                session.close();
                session.closed().await;
                Err(e)
            }
        }
    }

    async fn check_server_version(
        session: &Session,
        addr: &ServerAddress,
        required: &str,
    ) -> Result<String, NetworkError> {
        let reply = session
            .send_request(
                "server.version",
                vec![json!(USER_AGENT), json!(required)],
            )
            .await?;

        let protocol = reply
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| NetworkError::Protocol("malformed server.version reply".to_string()))?;

        if !version_at_least(protocol, required) {
            return Err(NetworkError::VersionMismatch {
                addr: addr.to_string(),
                found: protocol.to_string(),
                required: required.to_string(),
            });
        }
        Ok(protocol.to_string())
    }

    /// Stop the loop, tear down any live session, and wait until both are
    /// gone. Safe to call more than once.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(session) = self.session.load_full() {
            session.close();
            session.closed().await;
        }
        self.session.store(None);

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        *self.state.write() = ConnectionState::Disconnected;
    }

    /// Point-in-time query: connected and the session is not already
    /// closing.
    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
            && self
                .session
                .load()
                .as_ref()
                .map(|s| !s.is_closing())
                .unwrap_or(false)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// The session currently carrying requests, if any.
    pub fn active_session(&self) -> Option<Arc<Session>> {
        self.session.load_full().filter(|s| !s.is_closing())
    }

    /// Fires the connected server's address after each successful handshake.
    pub fn on_connected(&self) -> broadcast::Receiver<ServerAddress> {
        self.connected_tx.subscribe()
    }
}

/// Dotted-numeric version comparison; missing segments count as zero and
/// non-numeric segments as incomparable (treated as too old).
fn version_at_least(found: &str, required: &str) -> bool {
    fn segments(v: &str) -> Option<Vec<u32>> {
        v.split('.').map(|s| s.parse::<u32>().ok()).collect()
    }
    match (segments(found), segments(required)) {
        (Some(found), Some(required)) => {
            let len = found.len().max(required.len());
            for i in 0..len {
                let f = found.get(i).copied().unwrap_or(0);
                let r = required.get(i).copied().unwrap_or(0);
                if f != r {
                    return f > r;
                }
            }
            true
        }
        _ => false,
    }
}
