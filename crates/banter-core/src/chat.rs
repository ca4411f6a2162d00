//! Messaging engine: broadcast, private delivery, and the command
//! sub-protocol.
//!
//! All handlers run on an authenticated connection (the router enforces
//! that) and follow the same contract as the rest of the engine: errors are
//! returned as [`ChatError`] values for the router to surface, successes
//! acknowledge the originating connection directly.

use banter_protocol::{Reply, ReplyKind, ServerEnvelope};
use tracing::{debug, info, warn};

use crate::connection::ConnectionId;
use crate::engine::{ChatError, Engine};
use crate::store::CredentialStore;

/// Maximum chat message length in bytes, for both broadcast and private
/// paths.
pub const MAX_MESSAGE_LENGTH: usize = 256;

impl<S: CredentialStore> Engine<S> {
    /// Broadcast a chat message to every live connection, sender included.
    pub(crate) fn broadcast_message(
        &mut self,
        conn: ConnectionId,
        message: Option<String>,
    ) -> Result<(), ChatError> {
        let content = message.ok_or(ChatError::MissingContent)?;
        if content.len() > MAX_MESSAGE_LENGTH {
            return Err(ChatError::InvalidLength);
        }
        let Some(username) = self.registry.username(conn).map(str::to_owned) else {
            return Err(ChatError::NotLoggedIn);
        };

        debug!(connection = %conn, user = %username, bytes = content.len(), "broadcast message");
        let envelope = ServerEnvelope::chat(&username, &content);
        self.registry.broadcast(&envelope);
        self.registry
            .send(conn, Reply::success(ReplyKind::Message, "Message sent."));
        Ok(())
    }

    /// Deliver a message to one connection bound to the recipient.
    ///
    /// If the recipient is logged in on several connections, the first in
    /// accept order receives it. Nothing is broadcast on failure.
    pub(crate) fn private_message(
        &mut self,
        conn: ConnectionId,
        to: Option<String>,
        content: Option<String>,
    ) -> Result<(), ChatError> {
        let (Some(to), Some(content)) = (to, content) else {
            return Err(ChatError::MissingRecipient);
        };
        if content.len() > MAX_MESSAGE_LENGTH {
            return Err(ChatError::InvalidLength);
        }
        let Some(from) = self.registry.username(conn).map(str::to_owned) else {
            return Err(ChatError::NotLoggedIn);
        };
        let Some(&target) = self.registry.connections_for(&to).first() else {
            return Err(ChatError::UserNotFound);
        };

        debug!(connection = %conn, from = %from, to = %to, "private message");
        self.registry
            .send(target, ServerEnvelope::private(&from, &to, &content));
        self.registry.send(
            conn,
            Reply::success(ReplyKind::PrivateMessage, "Private message sent."),
        );
        Ok(())
    }

    /// Handle the command sub-protocol.
    pub(crate) fn command(
        &mut self,
        conn: ConnectionId,
        command: Option<String>,
        password: Option<String>,
    ) -> Result<(), ChatError> {
        let command = command.ok_or(ChatError::MissingCommand)?;

        if command.starts_with("/kick") || command.starts_with("/ban") {
            if !self.is_admin(conn) {
                let actor = self.registry.username(conn).unwrap_or("<unbound>");
                warn!(connection = %conn, user = %actor, command = %command, "unauthorized admin command");
                return Err(ChatError::Unauthorized);
            }
            self.admin_command(conn, &command, password)
        } else if command == "/list" {
            let users = self.registry.bound_usernames();
            self.registry.send(conn, Reply::user_list(users));
            Ok(())
        } else {
            Err(ChatError::UnknownCommand)
        }
    }

    /// Execute `/kick` or `/ban` after re-validating the admin.
    ///
    /// The envelope must carry the admin's own password, checked against a
    /// freshly reloaded snapshot; the in-memory admin flag may be stale.
    fn admin_command(
        &mut self,
        conn: ConnectionId,
        command: &str,
        password: Option<String>,
    ) -> Result<(), ChatError> {
        let password = password.ok_or(ChatError::MissingAdminPassword)?;
        let Some(actor) = self.registry.username(conn).map(str::to_owned) else {
            return Err(ChatError::NotLoggedIn);
        };

        self.reload_users();
        let authorized = self
            .users
            .get(&actor)
            .is_some_and(|record| record.password == password && record.is_admin);
        if !authorized {
            warn!(connection = %conn, user = %actor, "admin re-validation failed");
            return Err(ChatError::Unauthorized);
        }

        if let Some(target) = command.strip_prefix("/kick ") {
            self.kick(conn, &actor, target)
        } else if let Some(target) = command.strip_prefix("/ban ") {
            self.ban(conn, &actor, target)
        } else {
            Err(ChatError::UnknownCommand)
        }
    }

    fn kick(&mut self, conn: ConnectionId, actor: &str, target: &str) -> Result<(), ChatError> {
        let Some(&victim) = self.registry.connections_for(target).first() else {
            return Err(ChatError::UserNotFound);
        };

        info!(admin = %actor, user = %target, "user kicked");
        self.registry.close(victim, "Kicked by admin");
        self.registry
            .send(conn, Reply::success(ReplyKind::Command, "User kicked."));
        Ok(())
    }

    /// Ban a registered user and close their connection if they are online.
    ///
    /// The ban is recorded and persisted whether or not the target is
    /// currently connected.
    fn ban(&mut self, conn: ConnectionId, actor: &str, target: &str) -> Result<(), ChatError> {
        if !self.users.contains_key(target) {
            return Err(ChatError::UserNotFound);
        }

        self.banned.insert(target.to_string());
        if let Err(err) = self.store.save_banned(&self.banned) {
            warn!(error = %err, "failed to persist ban set");
        }
        info!(admin = %actor, user = %target, "user banned");

        if let Some(&victim) = self.registry.connections_for(target).first() {
            self.registry.close(victim, "Banned by admin");
        }
        self.registry
            .send(conn, Reply::success(ReplyKind::Command, "User banned."));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHandle, Outbound};
    use crate::store::MemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn engine() -> (Engine<MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        (Engine::new(store.clone()), store)
    }

    fn connect(engine: &mut Engine<MemoryStore>) -> (ConnectionId, UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::channel();
        let conn = ConnectionId::next();
        engine.connect(conn, handle);
        (conn, rx)
    }

    fn login_as(
        engine: &mut Engine<MemoryStore>,
        username: &str,
        password: &str,
    ) -> (ConnectionId, UnboundedReceiver<Outbound>) {
        let (conn, mut rx) = connect(engine);
        engine.handle_text(
            conn,
            &json!({"type": "login", "username": username, "password": password}).to_string(),
        );
        drain(&mut rx);
        (conn, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn success(kind: ReplyKind, message: &str) -> Outbound {
        Outbound::Deliver(ServerEnvelope::from(Reply::success(kind, message)))
    }

    fn error(kind: ReplyKind, message: &str) -> Outbound {
        Outbound::Deliver(ServerEnvelope::from(Reply::error(kind, message)))
    }

    #[test]
    fn test_broadcast_reaches_everyone_including_sender() {
        let (mut engine, _store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");
        let (_bob, mut bob_rx) = login_as(&mut engine, "bob", "pw2");

        engine.handle_text(alice, &json!({"type": "message", "message": "hi"}).to_string());

        let chat = Outbound::Deliver(ServerEnvelope::chat("alice", "hi"));
        assert_eq!(
            drain(&mut alice_rx),
            vec![
                chat.clone(),
                success(ReplyKind::Message, "Message sent."),
            ]
        );
        assert_eq!(drain(&mut bob_rx), vec![chat]);
    }

    #[test]
    fn test_message_length_boundary() {
        let (mut engine, _store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");
        let (_bob, mut bob_rx) = login_as(&mut engine, "bob", "pw2");

        let at_cap = "a".repeat(MAX_MESSAGE_LENGTH);
        let over_cap = "a".repeat(MAX_MESSAGE_LENGTH + 1);

        engine.handle_text(alice, &json!({"type": "message", "message": at_cap}).to_string());
        engine.handle_text(
            alice,
            &json!({"type": "message", "message": over_cap}).to_string(),
        );

        let replies = drain(&mut alice_rx);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[1], success(ReplyKind::Message, "Message sent."));
        assert_eq!(
            replies[2],
            error(ReplyKind::Message, "Invalid message length.")
        );
        // Only the in-cap message was broadcast.
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[test]
    fn test_private_message_length_boundary() {
        let (mut engine, _store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");
        let (_bob, mut bob_rx) = login_as(&mut engine, "bob", "pw2");

        let at_cap = "a".repeat(MAX_MESSAGE_LENGTH);
        let over_cap = "a".repeat(MAX_MESSAGE_LENGTH + 1);

        engine.handle_text(
            alice,
            &json!({"type": "private_message", "to": "bob", "content": at_cap}).to_string(),
        );
        engine.handle_text(
            alice,
            &json!({"type": "private_message", "to": "bob", "content": over_cap}).to_string(),
        );

        let replies = drain(&mut alice_rx);
        assert_eq!(
            replies,
            vec![
                success(ReplyKind::PrivateMessage, "Private message sent."),
                error(ReplyKind::PrivateMessage, "Invalid message length."),
            ]
        );
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[test]
    fn test_missing_message_content() {
        let (mut engine, _store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");

        engine.handle_text(alice, r#"{"type":"message"}"#);

        assert_eq!(
            drain(&mut alice_rx),
            vec![error(ReplyKind::Message, "Message does not contain content.")]
        );
    }

    #[test]
    fn test_private_message_to_offline_user() {
        let (mut engine, _store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");

        engine.handle_text(
            alice,
            &json!({"type": "private_message", "to": "bob", "content": "hey"}).to_string(),
        );

        assert_eq!(
            drain(&mut alice_rx),
            vec![error(ReplyKind::PrivateMessage, "User not found.")]
        );
    }

    #[test]
    fn test_private_message_goes_to_first_bound_connection() {
        let (mut engine, _store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");
        let (_bob_first, mut bob_first_rx) = login_as(&mut engine, "bob", "pw2");
        let (_bob_second, mut bob_second_rx) = login_as(&mut engine, "bob", "pw2");

        engine.handle_text(
            alice,
            &json!({"type": "private_message", "to": "bob", "content": "hey"}).to_string(),
        );

        assert_eq!(
            drain(&mut bob_first_rx),
            vec![Outbound::Deliver(ServerEnvelope::private(
                "alice", "bob", "hey"
            ))]
        );
        assert!(drain(&mut bob_second_rx).is_empty());
        assert_eq!(
            drain(&mut alice_rx),
            vec![success(ReplyKind::PrivateMessage, "Private message sent.")]
        );
    }

    #[test]
    fn test_list_returns_bound_usernames_in_accept_order() {
        let (mut engine, _store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");
        let (_bob, _bob_rx) = login_as(&mut engine, "bob", "pw2");
        let (_bob_again, _bob_again_rx) = login_as(&mut engine, "bob", "pw2");
        // A connection that never logs in does not appear.
        let (_idle, _idle_rx) = connect(&mut engine);

        engine.handle_text(alice, r#"{"type":"command","command":"/list"}"#);

        assert_eq!(
            drain(&mut alice_rx),
            vec![Outbound::Deliver(ServerEnvelope::from(Reply::user_list(
                vec!["alice".into(), "bob".into(), "bob".into()]
            )))]
        );
    }

    #[test]
    fn test_unknown_command() {
        let (mut engine, _store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");

        engine.handle_text(alice, r#"{"type":"command","command":"/dance"}"#);
        engine.handle_text(alice, r#"{"type":"command"}"#);

        assert_eq!(
            drain(&mut alice_rx),
            vec![
                error(ReplyKind::Command, "Unknown command."),
                error(ReplyKind::Command, "Command message does not contain command."),
            ]
        );
    }

    #[test]
    fn test_non_admin_cannot_ban() {
        let (mut engine, store) = engine();
        let (alice, mut alice_rx) = login_as(&mut engine, "alice", "pw1");
        let (_bob, _bob_rx) = login_as(&mut engine, "bob", "pw2");

        engine.handle_text(
            alice,
            &json!({"type": "command", "command": "/ban bob", "password": "pw1"}).to_string(),
        );

        assert_eq!(
            drain(&mut alice_rx),
            vec![error(ReplyKind::Command, "Unauthorized admin command.")]
        );
        assert!(store.banned().is_empty());
    }

    #[test]
    fn test_admin_ban_closes_and_persists() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");
        let (_bob, mut bob_rx) = login_as(&mut engine, "bob", "pw2");

        engine.handle_text(
            carol,
            &json!({"type": "command", "command": "/ban bob", "password": "root"}).to_string(),
        );

        assert_eq!(
            drain(&mut carol_rx),
            vec![success(ReplyKind::Command, "User banned.")]
        );
        assert_eq!(
            drain(&mut bob_rx),
            vec![Outbound::Close {
                reason: "Banned by admin".into()
            }]
        );
        assert!(store.banned().contains("bob"));
    }

    #[test]
    fn test_ban_offline_user_still_recorded() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        store.insert_user("bob", "pw2", false);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");

        engine.handle_text(
            carol,
            &json!({"type": "command", "command": "/ban bob", "password": "root"}).to_string(),
        );

        assert_eq!(
            drain(&mut carol_rx),
            vec![success(ReplyKind::Command, "User banned.")]
        );
        assert!(store.banned().contains("bob"));
    }

    #[test]
    fn test_ban_unknown_user() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");

        engine.handle_text(
            carol,
            &json!({"type": "command", "command": "/ban nobody", "password": "root"}).to_string(),
        );

        assert_eq!(
            drain(&mut carol_rx),
            vec![error(ReplyKind::Command, "User not found.")]
        );
        assert!(store.banned().is_empty());
    }

    #[test]
    fn test_admin_kick() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");
        let (_bob, mut bob_rx) = login_as(&mut engine, "bob", "pw2");

        engine.handle_text(
            carol,
            &json!({"type": "command", "command": "/kick bob", "password": "root"}).to_string(),
        );

        assert_eq!(
            drain(&mut carol_rx),
            vec![success(ReplyKind::Command, "User kicked.")]
        );
        assert_eq!(
            drain(&mut bob_rx),
            vec![Outbound::Close {
                reason: "Kicked by admin".into()
            }]
        );
        // A kick is not a ban.
        assert!(store.banned().is_empty());
    }

    #[test]
    fn test_kick_offline_user() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");

        engine.handle_text(
            carol,
            &json!({"type": "command", "command": "/kick bob", "password": "root"}).to_string(),
        );

        assert_eq!(
            drain(&mut carol_rx),
            vec![error(ReplyKind::Command, "User not found.")]
        );
    }

    #[test]
    fn test_admin_command_requires_password_field() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");

        engine.handle_text(carol, r#"{"type":"command","command":"/kick bob"}"#);

        assert_eq!(
            drain(&mut carol_rx),
            vec![error(
                ReplyKind::Command,
                "Admin command does not contain password."
            )]
        );
    }

    #[test]
    fn test_admin_command_rejects_wrong_password() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");
        let (_bob, _bob_rx) = login_as(&mut engine, "bob", "pw2");

        engine.handle_text(
            carol,
            &json!({"type": "command", "command": "/ban bob", "password": "wrong"}).to_string(),
        );

        assert_eq!(
            drain(&mut carol_rx),
            vec![error(ReplyKind::Command, "Unauthorized admin command.")]
        );
        assert!(store.banned().is_empty());
    }

    #[test]
    fn test_revoked_admin_is_denied_per_fresh_snapshot() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");
        let (_bob, mut bob_rx) = login_as(&mut engine, "bob", "pw2");

        // Revocation lands in the store after carol's login cached the flag.
        store.insert_user("carol", "root", false);

        engine.handle_text(
            carol,
            &json!({"type": "command", "command": "/ban bob", "password": "root"}).to_string(),
        );

        assert_eq!(
            drain(&mut carol_rx),
            vec![error(ReplyKind::Command, "Unauthorized admin command.")]
        );
        assert!(store.banned().is_empty());
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_kick_without_target_is_unknown_command() {
        let (mut engine, store) = engine();
        store.insert_user("carol", "root", true);
        let (carol, mut carol_rx) = login_as(&mut engine, "carol", "root");

        engine.handle_text(
            carol,
            &json!({"type": "command", "command": "/kick", "password": "root"}).to_string(),
        );

        assert_eq!(
            drain(&mut carol_rx),
            vec![error(ReplyKind::Command, "Unknown command.")]
        );
    }
}
