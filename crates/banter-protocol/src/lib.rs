//! # banter-protocol
//!
//! Wire protocol definitions for the banter chat server.
//!
//! This crate defines the JSON envelopes exchanged between chat clients and
//! the server, together with the codec that turns raw WebSocket text into
//! typed envelopes.
//!
//! ## Envelope Types
//!
//! Inbound (client to server):
//!
//! - `login` - Authenticate (or auto-register) a connection
//! - `message` - Broadcast a chat message to the room
//! - `private_message` - Deliver a message to a single user
//! - `command` - The command sub-protocol (`/list`, `/kick`, `/ban`)
//!
//! Outbound (server to client):
//!
//! - [`Reply`] - Per-request acknowledgement carrying `status` and `message`
//! - [`Push`] - Chat broadcasts and private deliveries
//!
//! ## Example
//!
//! ```rust
//! use banter_protocol::{codec, ClientEnvelope};
//!
//! let envelope = codec::decode(r#"{"type":"login","username":"alice","password":"pw1"}"#).unwrap();
//! assert!(matches!(envelope, ClientEnvelope::Login { .. }));
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{ClientEnvelope, Push, Reply, ReplyKind, ServerEnvelope, Status};
