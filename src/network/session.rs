//! Client Session
//!
//! One live connection to a single SPV server. A session owns the socket
//! through a background I/O task, matches replies to in-flight requests by
//! id, and hands unsolicited pushes to the subscription router. Its
//! disconnect signal fires exactly once, whether the server closed on us or
//! we closed locally; after that the session is dead and a fresh one must
//! be connected.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ServerAddress;
use crate::error::NetworkError;
use crate::network::router::SubscriptionRouter;
use crate::network::wire::{self, Incoming};
use crate::telemetry::metrics::{record_rpc_failure, record_rpc_latency, record_rpc_request};

type PendingMap = DashMap<u64, oneshot::Sender<Result<Value, NetworkError>>>;

pub struct Session {
    addr: ServerAddress,
    request_tx: mpsc::UnboundedSender<String>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    close_tx: watch::Sender<bool>,
    disconnect_rx: watch::Receiver<bool>,
    closing: AtomicBool,
}

impl Session {
    /// Establish a connection to one server. The returned session is live
    /// until its disconnect signal fires.
    pub async fn connect(
        addr: &ServerAddress,
        router: Arc<SubscriptionRouter>,
        connect_timeout: Duration,
    ) -> Result<Arc<Session>, NetworkError> {
        let stream = timeout(
            connect_timeout,
            TcpStream::connect((addr.host.as_str(), addr.port)),
        )
        .await
        .map_err(|_| NetworkError::Connect {
            addr: addr.to_string(),
            reason: "connect timed out".to_string(),
        })?
        .map_err(|e| NetworkError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let (disconnect_tx, disconnect_rx) = watch::channel(false);
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());

        tokio::spawn(Self::run_io(
            stream,
            request_rx,
            close_rx,
            disconnect_tx,
            pending.clone(),
            router,
            addr.to_string(),
        ));

        debug!("Session established with {}", addr);

        Ok(Arc::new(Session {
            addr: addr.clone(),
            request_tx,
            pending,
            next_id: AtomicU64::new(0),
            close_tx,
            disconnect_rx,
            closing: AtomicBool::new(false),
        }))
    }

    /// Send one request and await its matched reply. Replies are correlated
    /// by id, so concurrent requests resolve independently of arrival order.
    pub async fn send_request(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, NetworkError> {
        if *self.disconnect_rx.borrow() {
            return Err(NetworkError::ConnectionLost);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(id, reply_tx);

        let frame = match wire::encode_request(id, method, &params) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.remove(&id);
                return Err(e);
            }
        };
        if self.request_tx.send(frame).is_err() {
            self.pending.remove(&id);
            return Err(NetworkError::ConnectionLost);
        }

        record_rpc_request();
        let start = Instant::now();

        // Racing the reply against the disconnect signal guarantees the
        // caller never hangs on a dead session.
        let mut disconnected = self.disconnect_rx.clone();
        let result = tokio::select! {
            reply = reply_rx => match reply {
                Ok(result) => result,
                Err(_) => Err(NetworkError::ConnectionLost),
            },
            _ = disconnected.wait_for(|d| *d) => {
                self.pending.remove(&id);
                Err(NetworkError::ConnectionLost)
            }
        };

        record_rpc_latency(start.elapsed().as_secs_f64() * 1000.0);
        if result.is_err() {
            record_rpc_failure();
        }
        result
    }

    /// Address this session is bound to.
    pub fn addr(&self) -> &ServerAddress {
        &self.addr
    }

    /// Request local closure. Idempotent; the disconnect signal still fires
    /// exactly once, from the I/O task as it exits.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.close_tx.send(true);
    }

    /// True once local closure was requested or the connection dropped.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || *self.disconnect_rx.borrow()
    }

    /// Resolves when the disconnect signal has fired.
    pub async fn closed(&self) {
        let mut rx = self.disconnect_rx.clone();
        let _ = rx.wait_for(|d| *d).await;
    }

    /// Single I/O task per session: multiplexes outgoing frames and the
    /// incoming line stream, then fires the disconnect signal on exit and
    /// drains every pending request.
    async fn run_io(
        stream: TcpStream,
        mut request_rx: mpsc::UnboundedReceiver<String>,
        mut close_rx: watch::Receiver<bool>,
        disconnect_tx: watch::Sender<bool>,
        pending: Arc<PendingMap>,
        router: Arc<SubscriptionRouter>,
        addr: String,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            tokio::select! {
                _ = async { let _ = close_rx.wait_for(|c| *c).await; } => {
                    debug!("Session with {} closing locally", addr);
                    break;
                }
                frame = request_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = Self::write_frame(&mut write_half, &frame).await {
                                warn!("Write to {} failed: {}", addr, e);
                                break;
                            }
                        }
                        None => break,
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Err(e) = Self::handle_line(&line, &pending, &router) {
                                warn!("Tearing down session with {}: {}", addr, e);
                                break;
                            }
                        }
                        Ok(None) => {
                            info!("Server {} closed the connection", addr);
                            break;
                        }
                        Err(e) => {
                            warn!("Read from {} failed: {}", addr, e);
                            break;
                        }
                    }
                }
            }
        }

        let _ = disconnect_tx.send(true);
        // Dropping the reply senders resolves every in-flight caller with
        // ConnectionLost.
        pending.clear();
    }

    async fn write_frame(write_half: &mut OwnedWriteHalf, frame: &str) -> std::io::Result<()> {
        write_half.write_all(frame.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await
    }

    fn handle_line(
        line: &str,
        pending: &PendingMap,
        router: &SubscriptionRouter,
    ) -> Result<(), NetworkError> {
        match wire::decode(line)? {
            Incoming::Response { id, result } => match pending.remove(&id) {
                Some((_, reply_tx)) => {
                    let result = result.map_err(|e| NetworkError::Remote {
                        code: e.code,
                        message: e.message,
                    });
                    let _ = reply_tx.send(result);
                }
                None => debug!("Reply for unknown request id {}", id),
            },
            Incoming::Notification { method, params } => {
                router.dispatch(&method, params);
            }
        }
        Ok(())
    }
}
