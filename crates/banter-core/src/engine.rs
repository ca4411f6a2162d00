//! The session/state engine.
//!
//! One [`Engine`] owns every piece of shared chat state: the connection
//! registry, the in-memory user table, the ban set, and the credential
//! store handle. The embedding server serializes all access to it, so each
//! method here can assume it is the only thing touching shared state.
//!
//! Inbound handling is split in two: this module carries the router
//! (envelope decoding and dispatch) and the auth engine (login,
//! authorization queries, snapshot reloads); the messaging handlers live in
//! [`crate::chat`].

use std::collections::{BTreeMap, BTreeSet};

use banter_protocol::{codec, ClientEnvelope, Reply, ReplyKind};
use thiserror::Error;
use tracing::{info, warn};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::registry::Registry;
use crate::store::{CredentialStore, UserRecord};

/// Per-envelope failures, each carrying its wire message as `Display`.
///
/// None of these tears a session down; the router answers the originating
/// connection with an error envelope and the connection lives on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("User not logged in.")]
    NotLoggedIn,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Login message does not contain username or password.")]
    MissingCredentials,
    #[error("Invalid username format.")]
    InvalidUsername,
    #[error("Password cannot be empty.")]
    EmptyPassword,
    #[error("User is banned.")]
    Banned,
    #[error("Login failed.")]
    LoginFailed,
    #[error("Message does not contain content.")]
    MissingContent,
    #[error("Invalid message length.")]
    InvalidLength,
    #[error("Private message does not contain recipient or content.")]
    MissingRecipient,
    #[error("User not found.")]
    UserNotFound,
    #[error("Command message does not contain command.")]
    MissingCommand,
    #[error("Admin command does not contain password.")]
    MissingAdminPassword,
    #[error("Unauthorized admin command.")]
    Unauthorized,
    #[error("Unknown command.")]
    UnknownCommand,
}

/// The state aggregate behind the serialization domain.
pub struct Engine<S> {
    pub(crate) registry: Registry,
    pub(crate) users: BTreeMap<String, UserRecord>,
    pub(crate) banned: BTreeSet<String>,
    pub(crate) store: S,
}

impl<S: CredentialStore> Engine<S> {
    /// Create an engine over a credential store.
    ///
    /// Loads both snapshots immediately; an unreadable snapshot starts the
    /// engine with an empty table and is logged, not fatal.
    pub fn new(store: S) -> Self {
        let mut engine = Self {
            registry: Registry::new(),
            users: BTreeMap::new(),
            banned: BTreeSet::new(),
            store,
        };
        engine.reload_users();
        engine.reload_banned();
        engine
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Track a newly accepted connection.
    pub fn connect(&mut self, conn: ConnectionId, handle: ConnectionHandle) {
        self.registry.register(conn, handle);
        info!(connection = %conn, "connection opened");
    }

    /// Process a connection close, dropping its registry entry and binding.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        self.registry.unregister(conn);
        info!(connection = %conn, "connection closed");
    }

    /// Handle one raw inbound frame.
    ///
    /// Every failure ends as an error envelope on the originating
    /// connection; malformed input never affects the session itself.
    pub fn handle_text(&mut self, conn: ConnectionId, raw: &str) {
        match codec::decode(raw) {
            Ok(envelope) => {
                let kind = envelope.reply_kind();
                if let Err(err) = self.dispatch(conn, envelope) {
                    let kind = if matches!(err, ChatError::UnknownType(_)) {
                        ReplyKind::Error
                    } else {
                        kind
                    };
                    warn!(connection = %conn, error = %err, "envelope rejected");
                    self.registry.send(conn, Reply::error(kind, err.to_string()));
                }
            }
            Err(err) => {
                warn!(connection = %conn, error = %err, "malformed envelope");
                self.registry
                    .send(conn, Reply::error(ReplyKind::Error, err.to_string()));
            }
        }
    }

    /// Route a decoded envelope to its handler.
    ///
    /// `login` is reachable from any state; everything else requires a
    /// session binding first, unknown types included.
    fn dispatch(&mut self, conn: ConnectionId, envelope: ClientEnvelope) -> Result<(), ChatError> {
        match envelope {
            ClientEnvelope::Login { username, password } => self.login(conn, username, password),
            _ if !self.is_logged_in(conn) => Err(ChatError::NotLoggedIn),
            ClientEnvelope::Message { message } => self.broadcast_message(conn, message),
            ClientEnvelope::PrivateMessage { to, content } => {
                self.private_message(conn, to, content)
            }
            ClientEnvelope::Command { command, password } => self.command(conn, command, password),
            ClientEnvelope::Unknown { kind } => Err(ChatError::UnknownType(kind)),
        }
    }

    /// Authenticate a connection, auto-registering unseen usernames.
    ///
    /// Both snapshots are reloaded first so out-of-band edits to the store
    /// (a ban issued by another operator, a password change) are honored at
    /// the very next login attempt.
    fn login(
        &mut self,
        conn: ConnectionId,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<(), ChatError> {
        let (Some(username), Some(password)) = (username, password) else {
            return Err(ChatError::MissingCredentials);
        };
        if !is_valid_username(&username) {
            return Err(ChatError::InvalidUsername);
        }
        if password.is_empty() {
            return Err(ChatError::EmptyPassword);
        }

        self.reload_banned();
        if self.banned.contains(&username) {
            warn!(connection = %conn, user = %username, "banned user attempted login");
            return Err(ChatError::Banned);
        }

        self.reload_users();
        match self.users.get(&username) {
            Some(record) if record.password == password => {
                self.registry.bind(conn, &username);
                info!(connection = %conn, user = %username, "user logged in");
                self.registry
                    .send(conn, Reply::success(ReplyKind::Login, "Login successful."));
                Ok(())
            }
            Some(_) => {
                warn!(connection = %conn, user = %username, "login failed");
                Err(ChatError::LoginFailed)
            }
            None => {
                self.users
                    .insert(username.clone(), UserRecord::new(password));
                if let Err(err) = self.store.save_users(&self.users) {
                    warn!(error = %err, "failed to persist user table after registration");
                }
                self.registry.bind(conn, &username);
                info!(connection = %conn, user = %username, "user registered and logged in");
                self.registry.send(
                    conn,
                    Reply::success(ReplyKind::Login, "Registration and login successful."),
                );
                Ok(())
            }
        }
    }

    /// Whether a session binding exists for this connection.
    #[must_use]
    pub fn is_logged_in(&self, conn: ConnectionId) -> bool {
        self.registry.username(conn).is_some()
    }

    /// Whether this connection's bound user is an admin, per the in-memory
    /// table. False when not logged in.
    #[must_use]
    pub fn is_admin(&self, conn: ConnectionId) -> bool {
        self.registry
            .username(conn)
            .and_then(|username| self.users.get(username))
            .is_some_and(|record| record.is_admin)
    }

    /// Refresh the user table from the store, keeping the current table on
    /// failure.
    pub(crate) fn reload_users(&mut self) {
        match self.store.load_users() {
            Ok(users) => self.users = users,
            Err(err) => {
                warn!(error = %err, "failed to load user snapshot, keeping in-memory table");
            }
        }
    }

    /// Refresh the ban set from the store, keeping the current set on
    /// failure.
    pub(crate) fn reload_banned(&mut self) {
        match self.store.load_banned() {
            Ok(banned) => self.banned = banned,
            Err(err) => {
                warn!(error = %err, "failed to load ban snapshot, keeping in-memory set");
            }
        }
    }
}

/// Usernames are one or more word characters: `[A-Za-z0-9_]+`.
fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
