//! Transport-facing connection types.
//!
//! The core never talks to a socket. The transport registers a sink per
//! accepted connection and is handed an opaque [`ConnectionId`] to tag later
//! events with; the delivery queue pushes outbound frames through the sink.

use std::fmt;

/// Opaque handle for one accepted connection.
///
/// Minted by the server at `connection_opened`; two ids are equal exactly
/// when they refer to the same accept event. A reconnecting client gets a
/// fresh id — continuity of identity lives in the client record, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound side of one connection, implemented by the transport.
///
/// `send_text` is called only from the delivery queue's consumer thread and
/// may block; implementations that hand off to an async writer should fail
/// fast once the peer is gone so the failure can be logged and skipped.
pub trait Connection: Send + Sync {
    /// Push one UTF-8 frame to the peer.
    fn send_text(&self, text: &str) -> Result<(), ConnectionError>;

    /// Ask the transport to close this connection. Idempotent.
    fn close(&self);
}

/// A send on a connection failed (typically: the peer is gone).
#[derive(Debug, thiserror::Error)]
#[error("connection send failed: {0}")]
pub struct ConnectionError(pub String);
