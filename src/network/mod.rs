//! Network module
//!
//! Connection lifecycle and event distribution: the client session, the
//! subscription router, the failover connection manager, and the RPC facade.

pub mod client;
pub mod manager;
pub mod router;
pub mod session;
pub mod wire;

pub use client::{SpvClient, DEFAULT_HEADER_BATCH};
pub use manager::{ConnectionManager, ConnectionState};
pub use router::{SubscriptionRouter, Topic};
pub use session::Session;
