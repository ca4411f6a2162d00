//! Credential store interface.
//!
//! The store is the durable authority for user records and the ban set.
//! The engine reloads it at the policy points defined by the auth and
//! moderation flows (before every login and before every admin check) and
//! writes whole snapshots back on registration and ban.
//!
//! Passwords are stored in clear text; swapping in a salted-hash store only
//! changes the comparison step of the engine, not this interface.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

/// Errors surfaced by a credential store.
///
/// Never fatal: a failed load leaves the engine's in-memory tables intact,
/// a failed save costs durability across restarts and nothing else.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Snapshot could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot contents are not in the expected shape.
    #[error("Malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub password: String,
    pub is_admin: bool,
}

impl UserRecord {
    /// Create a non-admin record, as issued by auto-registration.
    #[must_use]
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            is_admin: false,
        }
    }
}

/// Durable mapping of usernames to records, plus the ban set.
///
/// Reads and writes are whole-snapshot operations; there is no incremental
/// update. Implementations must tolerate concurrent processes only to the
/// extent of not corrupting a snapshot - last write wins.
pub trait CredentialStore {
    /// Load the full user table.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or parsed.
    fn load_users(&self) -> Result<BTreeMap<String, UserRecord>, StoreError>;

    /// Replace the full user table.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn save_users(&self, users: &BTreeMap<String, UserRecord>) -> Result<(), StoreError>;

    /// Load the ban set.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or parsed.
    fn load_banned(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Replace the ban set.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn save_banned(&self, banned: &BTreeSet<String>) -> Result<(), StoreError>;
}
