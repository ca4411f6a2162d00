//! In-memory credential store for tests and simulation.
//!
//! Cloned handles share one set of snapshots, so a test can mutate the
//! "durable" state out of band and watch the engine pick the change up at
//! its next reload point - the same observable behavior as editing the
//! JSON files under a running server.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use super::{CredentialStore, StoreError, UserRecord};

/// Shared in-memory snapshots.
///
/// Uses `lock().expect()` throughout; a poisoned mutex only happens if a
/// test thread panicked while holding it, and then the test has already
/// failed.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    users: BTreeMap<String, UserRecord>,
    banned: BTreeSet<String>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user record out of band.
    pub fn insert_user(&self, username: impl Into<String>, password: impl Into<String>, is_admin: bool) {
        let mut inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        inner.users.insert(
            username.into(),
            UserRecord {
                password: password.into(),
                is_admin,
            },
        );
    }

    /// Add a username to the ban set out of band.
    pub fn insert_banned(&self, username: impl Into<String>) {
        let mut inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        inner.banned.insert(username.into());
    }

    /// Snapshot of the current user table.
    #[must_use]
    pub fn users(&self) -> BTreeMap<String, UserRecord> {
        self.inner
            .lock()
            .expect("MemoryStore mutex poisoned")
            .users
            .clone()
    }

    /// Snapshot of the current ban set.
    #[must_use]
    pub fn banned(&self) -> BTreeSet<String> {
        self.inner
            .lock()
            .expect("MemoryStore mutex poisoned")
            .banned
            .clone()
    }
}

impl CredentialStore for MemoryStore {
    fn load_users(&self) -> Result<BTreeMap<String, UserRecord>, StoreError> {
        Ok(self.users())
    }

    fn save_users(&self, users: &BTreeMap<String, UserRecord>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        inner.users = users.clone();
        Ok(())
    }

    fn load_banned(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.banned())
    }

    fn save_banned(&self, banned: &BTreeSet<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("MemoryStore mutex poisoned");
        inner.banned = banned.clone();
        Ok(())
    }
}
