//! Error types for the SPV network client.

use thiserror::Error;

/// Errors surfaced by the network layer.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Server unreachable or the transport could not be established.
    /// Absorbed by the failover loop, never returned through the facade.
    #[error("connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    /// Server handshake succeeded but its protocol version is too old.
    #[error("server {addr} speaks protocol {found}, required at least {required}")]
    VersionMismatch {
        addr: String,
        found: String,
        required: String,
    },

    /// Server rejected a specific request.
    #[error("server error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The session carrying an in-flight request died before the reply.
    #[error("connection lost before a reply arrived")]
    ConnectionLost,

    /// An rpc call was made while no server connection is available.
    #[error("rpc request attempted while connection is not available")]
    NotConnected,

    /// The server sent a frame this client cannot make sense of.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl NetworkError {
    /// Returns `true` if the error is scoped to a single request and leaves
    /// the connection itself healthy.
    pub fn is_request_scoped(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}
