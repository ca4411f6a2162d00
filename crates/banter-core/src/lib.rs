//! # banter-core
//!
//! Session and state engine for the banter chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Live connections and their session bindings
//! - **Engine** - Authentication, message routing, and moderation
//! - **CredentialStore** - Durable user and ban snapshots
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Engine    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ Credential  │
//!                     │    Store    │
//!                     └─────────────┘
//! ```
//!
//! Every state-touching operation runs inside one serialization domain: the
//! embedding server wraps the [`Engine`] in a single mutex and holds it for
//! the whole handling of an envelope or a lifecycle event. No engine method
//! suspends, so the critical section never waits on another connection.

pub mod chat;
pub mod connection;
pub mod engine;
pub mod registry;
pub mod store;

pub use chat::MAX_MESSAGE_LENGTH;
pub use connection::{ConnectionHandle, ConnectionId, Outbound};
pub use engine::{ChatError, Engine};
pub use registry::Registry;
pub use store::{CredentialStore, JsonStore, MemoryStore, StoreError, UserRecord};
