//! Envelope types for the banter protocol.
//!
//! Envelopes are the fundamental unit of communication: every inbound or
//! outbound message is one JSON object with a mandatory `type` field.

use serde::{Deserialize, Serialize};

/// An inbound envelope from a client.
///
/// Fields are optional at the wire level so that the core can distinguish a
/// missing field from a malformed envelope and answer with the precise error
/// message for each case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Authenticate (or auto-register) this connection.
    Login {
        username: Option<String>,
        password: Option<String>,
    },

    /// Broadcast a chat message to every live connection.
    Message { message: Option<String> },

    /// Deliver a message to a single user.
    PrivateMessage {
        to: Option<String>,
        content: Option<String>,
    },

    /// Command sub-protocol: `/list`, `/kick <user>`, `/ban <user>`.
    ///
    /// Admin commands additionally carry the admin's own password for
    /// re-validation against the credential store.
    Command {
        command: Option<String>,
        password: Option<String>,
    },

    /// An envelope whose `type` the server does not recognize.
    ///
    /// Never appears on the wire as-is; produced by the codec so the router
    /// can still echo the type back in its error reply.
    #[serde(skip)]
    Unknown { kind: String },
}

impl ClientEnvelope {
    /// The reply kind the server echoes when answering this envelope.
    #[must_use]
    pub fn reply_kind(&self) -> ReplyKind {
        match self {
            Self::Login { .. } => ReplyKind::Login,
            Self::Message { .. } => ReplyKind::Message,
            Self::PrivateMessage { .. } => ReplyKind::PrivateMessage,
            Self::Command { .. } => ReplyKind::Command,
            Self::Unknown { kind } => ReplyKind::Other(kind.clone()),
        }
    }
}

/// Delivery status carried by every [`Reply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// The `type` field of a [`Reply`], echoing the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Login,
    Message,
    PrivateMessage,
    Command,
    UserList,
    /// Replies to envelopes that never reached a handler (missing or
    /// unparseable `type`).
    Error,
    /// Echo of a type string the server does not recognize.
    #[serde(untagged)]
    Other(String),
}

/// A per-request acknowledgement sent to the originating connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    pub status: Status,
    pub message: String,
    /// Present only on user-list replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
}

impl Reply {
    /// Create a success reply.
    #[must_use]
    pub fn success(kind: ReplyKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: Status::Success,
            message: message.into(),
            users: None,
        }
    }

    /// Create an error reply.
    #[must_use]
    pub fn error(kind: ReplyKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: Status::Error,
            message: message.into(),
            users: None,
        }
    }

    /// Create a user-list reply carrying the currently-bound usernames.
    #[must_use]
    pub fn user_list(users: Vec<String>) -> Self {
        Self {
            kind: ReplyKind::UserList,
            status: Status::Success,
            message: "User list sent.".to_string(),
            users: Some(users),
        }
    }
}

/// A server-initiated envelope delivered outside the request/reply cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Push {
    /// A chat message broadcast to every live connection.
    Message { username: String, content: String },

    /// A private message delivered only to the recipient's connection.
    PrivateMessage {
        from: String,
        to: String,
        content: String,
    },
}

/// Any outbound envelope.
///
/// Untagged because replies and pushes share `type` strings on the wire
/// (a broadcast and a send-acknowledgement are both `type: "message"`);
/// their field sets keep them unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerEnvelope {
    Push(Push),
    Reply(Reply),
}

impl ServerEnvelope {
    /// Create a chat broadcast envelope.
    #[must_use]
    pub fn chat(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Push(Push::Message {
            username: username.into(),
            content: content.into(),
        })
    }

    /// Create a private delivery envelope.
    #[must_use]
    pub fn private(
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Push(Push::PrivateMessage {
            from: from.into(),
            to: to.into(),
            content: content.into(),
        })
    }
}

impl From<Reply> for ServerEnvelope {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

impl From<Push> for ServerEnvelope {
    fn from(push: Push) -> Self {
        Self::Push(push)
    }
}
