//! Connection registry and session bindings.
//!
//! The registry tracks the live set of connections and the association
//! between a connection and its authenticated username. It is also the
//! delivery side of the core: acknowledgements, broadcasts, and forced
//! closes all go through it.
//!
//! A username may be bound on several connections at once (the protocol
//! does not reject a second login with the same name - treated as
//! multi-device behavior pending product clarification); lookups that need
//! a single connection take the first in accept order.

use std::collections::BTreeMap;

use banter_protocol::ServerEnvelope;
use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionId};

/// The live connection set and the session binding map.
///
/// The binding map's domain is always a subset of the live set: binding an
/// unregistered connection is a no-op, and unregistering removes any
/// binding along with the handle.
#[derive(Debug, Default)]
pub struct Registry {
    /// Live connections in accept order.
    connections: BTreeMap<ConnectionId, ConnectionHandle>,
    /// Authenticated connections and their usernames.
    bindings: BTreeMap<ConnectionId, String>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Track a newly accepted connection.
    pub fn register(&mut self, conn: ConnectionId, handle: ConnectionHandle) {
        debug!(connection = %conn, "connection registered");
        self.connections.insert(conn, handle);
    }

    /// Drop a connection and any session binding it holds.
    pub fn unregister(&mut self, conn: ConnectionId) {
        if let Some(username) = self.bindings.remove(&conn) {
            debug!(connection = %conn, user = %username, "session binding removed");
        }
        self.connections.remove(&conn);
    }

    /// Live connection IDs in accept order.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Bind a connection to an authenticated username.
    pub fn bind(&mut self, conn: ConnectionId, username: &str) {
        if !self.connections.contains_key(&conn) {
            warn!(connection = %conn, user = %username, "bind for unknown connection ignored");
            return;
        }
        self.bindings.insert(conn, username.to_string());
    }

    /// The username bound to a connection, if it has logged in.
    #[must_use]
    pub fn username(&self, conn: ConnectionId) -> Option<&str> {
        self.bindings.get(&conn).map(String::as_str)
    }

    /// All connections bound to a username, in accept order.
    #[must_use]
    pub fn connections_for(&self, username: &str) -> Vec<ConnectionId> {
        self.bindings
            .iter()
            .filter(|(_, bound)| bound.as_str() == username)
            .map(|(conn, _)| *conn)
            .collect()
    }

    /// Usernames of all bound connections, in accept order.
    ///
    /// One entry per live bound connection, so a username appears once per
    /// device it is logged in on.
    #[must_use]
    pub fn bound_usernames(&self) -> Vec<String> {
        self.bindings.values().cloned().collect()
    }

    /// Deliver an envelope to one connection.
    ///
    /// A failed send means the transport task is already tearing down; it
    /// is logged and otherwise ignored so the triggering request never
    /// fails on a receiver's dead socket.
    pub fn send(&self, conn: ConnectionId, envelope: impl Into<ServerEnvelope>) {
        if let Some(handle) = self.connections.get(&conn) {
            if !handle.deliver(envelope.into()) {
                warn!(connection = %conn, "delivery to closing connection dropped");
            }
        } else {
            warn!(connection = %conn, "delivery to unknown connection dropped");
        }
    }

    /// Deliver an envelope to every live connection.
    ///
    /// Returns the number of connections that accepted the envelope.
    pub fn broadcast(&self, envelope: &ServerEnvelope) -> usize {
        let mut delivered = 0;
        for (conn, handle) in &self.connections {
            if handle.deliver(envelope.clone()) {
                delivered += 1;
            } else {
                warn!(connection = %conn, "broadcast to closing connection dropped");
            }
        }
        delivered
    }

    /// Instruct a connection's transport task to close the session.
    pub fn close(&self, conn: ConnectionId, reason: &str) {
        if let Some(handle) = self.connections.get(&conn) {
            if !handle.close(reason) {
                warn!(connection = %conn, "close for already-closing connection dropped");
            }
        }
    }
}
