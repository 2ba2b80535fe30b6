//! Subscription Router
//!
//! Demultiplexes server-pushed notifications to per-topic broadcast
//! channels. The topic set is fixed at construction; a notification for
//! any other method is dropped, so newer servers can push methods this
//! client does not know about yet.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::telemetry::metrics::{record_notification, record_notification_dropped};

/// Push-notification topics recognized by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// New chain tip headers.
    Headers,
    /// Address balance/status changes.
    AddressStatus,
}

impl Topic {
    /// Wire method name the server pushes this topic under.
    pub fn method(&self) -> &'static str {
        match self {
            Topic::Headers => "blockchain.headers.subscribe",
            Topic::AddressStatus => "blockchain.address.subscribe",
        }
    }

    fn from_method(method: &str) -> Option<Topic> {
        match method {
            "blockchain.headers.subscribe" => Some(Topic::Headers),
            "blockchain.address.subscribe" => Some(Topic::AddressStatus),
            _ => None,
        }
    }
}

/// Routes incoming pushes to subscribers of the matching topic.
pub struct SubscriptionRouter {
    headers_tx: broadcast::Sender<Vec<Value>>,
    status_tx: broadcast::Sender<Vec<Value>>,
}

impl SubscriptionRouter {
    pub fn new(capacity: usize) -> Self {
        let (headers_tx, _) = broadcast::channel(capacity);
        let (status_tx, _) = broadcast::channel(capacity);
        Self {
            headers_tx,
            status_tx,
        }
    }

    fn channel(&self, topic: Topic) -> &broadcast::Sender<Vec<Value>> {
        match topic {
            Topic::Headers => &self.headers_tx,
            Topic::AddressStatus => &self.status_tx,
        }
    }

    /// Attach a new independent consumer to a topic. Never fails; the
    /// consumer sees only events published after this call.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Vec<Value>> {
        self.channel(topic).subscribe()
    }

    /// Deliver one server push. Unrecognized methods are silently dropped.
    pub fn dispatch(&self, method: &str, params: Vec<Value>) {
        match Topic::from_method(method) {
            Some(topic) => {
                record_notification();
                match self.channel(topic).send(params) {
                    Ok(count) => debug!("Notification {} sent to {} receivers", method, count),
                    Err(_) => debug!("No receivers for {}", method),
                }
            }
            None => {
                record_notification_dropped();
                debug!("Dropping notification for unrecognized method {}", method);
            }
        }
    }
}
