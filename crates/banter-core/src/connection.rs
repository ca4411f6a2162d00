//! Connection handles for the banter core.
//!
//! The core never touches sockets. Each live transport session is
//! represented by an opaque [`ConnectionId`] plus a [`ConnectionHandle`]
//! holding the outbound channel its transport task drains.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use banter_protocol::ServerEnvelope;
use tokio::sync::mpsc;

/// Counter backing [`ConnectionId::next`].
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
///
/// Identity only: the core compares and orders these but never interprets
/// them. Ordering follows accept order, which is what makes `/list` and
/// first-match delivery deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Issue the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An instruction for a connection's transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Deliver an envelope to the client.
    Deliver(ServerEnvelope),

    /// Close the underlying transport with a human-readable reason.
    Close { reason: String },
}

/// The registry's record of one live connection.
///
/// Holds the sending half of the connection's outbound channel; the
/// receiving half lives with the transport task. Sends never block, so
/// they are safe inside the serialization domain.
#[derive(Debug)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle around an existing outbound sender.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound }
    }

    /// Create a handle together with the receiver its transport task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Enqueue an envelope for delivery.
    ///
    /// Returns `false` if the transport task is already gone.
    pub fn deliver(&self, envelope: ServerEnvelope) -> bool {
        self.outbound.send(Outbound::Deliver(envelope)).is_ok()
    }

    /// Instruct the transport task to close the connection.
    ///
    /// Returns `false` if the transport task is already gone.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        self.outbound
            .send(Outbound::Close {
                reason: reason.into(),
            })
            .is_ok()
    }
}
