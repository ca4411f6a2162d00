//! File-backed credential store.
//!
//! Snapshots are two small JSON files, rewritten whole on every save:
//!
//! ```json
//! {"users": {"alice": {"password": "pw1", "is_admin": false}}}
//! ```
//!
//! ```json
//! {"banned_users": ["bob"]}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{CredentialStore, StoreError, UserRecord};

/// Credential store backed by JSON snapshot files.
#[derive(Debug, Clone)]
pub struct JsonStore {
    users_path: PathBuf,
    banned_path: PathBuf,
}

#[derive(Serialize)]
struct UsersSnapshotRef<'a> {
    users: &'a BTreeMap<String, UserRecord>,
}

#[derive(Deserialize)]
struct UsersSnapshot {
    users: BTreeMap<String, UserRecord>,
}

#[derive(Serialize)]
struct BannedSnapshotRef<'a> {
    banned_users: &'a BTreeSet<String>,
}

#[derive(Deserialize)]
struct BannedSnapshot {
    banned_users: BTreeSet<String>,
}

impl JsonStore {
    /// Create a store reading and writing the given snapshot paths.
    #[must_use]
    pub fn new(users_path: impl Into<PathBuf>, banned_path: impl Into<PathBuf>) -> Self {
        Self {
            users_path: users_path.into(),
            banned_path: banned_path.into(),
        }
    }

    fn write_snapshot(path: &Path, value: &impl Serialize) -> Result<(), StoreError> {
        let mut contents = serde_json::to_string_pretty(value)?;
        contents.push('\n');
        fs::write(path, contents)?;
        Ok(())
    }
}

impl CredentialStore for JsonStore {
    fn load_users(&self) -> Result<BTreeMap<String, UserRecord>, StoreError> {
        let contents = fs::read_to_string(&self.users_path)?;
        let snapshot: UsersSnapshot = serde_json::from_str(&contents)?;
        Ok(snapshot.users)
    }

    fn save_users(&self, users: &BTreeMap<String, UserRecord>) -> Result<(), StoreError> {
        Self::write_snapshot(&self.users_path, &UsersSnapshotRef { users })
    }

    fn load_banned(&self) -> Result<BTreeSet<String>, StoreError> {
        let contents = fs::read_to_string(&self.banned_path)?;
        let snapshot: BannedSnapshot = serde_json::from_str(&contents)?;
        Ok(snapshot.banned_users)
    }

    fn save_banned(&self, banned: &BTreeSet<String>) -> Result<(), StoreError> {
        Self::write_snapshot(&self.banned_path, &BannedSnapshotRef { banned_users: banned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_store() -> (JsonStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "banter-store-{}-{}",
            std::process::id(),
            DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).unwrap();
        let store = JsonStore::new(dir.join("users.json"), dir.join("banned_users.json"));
        (store, dir)
    }

    #[test]
    fn test_users_snapshot_roundtrip() {
        let (store, dir) = scratch_store();

        let mut users = BTreeMap::new();
        users.insert("alice".to_string(), UserRecord::new("pw1"));
        users.insert(
            "carol".to_string(),
            UserRecord {
                password: "root".into(),
                is_admin: true,
            },
        );

        store.save_users(&users).unwrap();
        assert_eq!(store.load_users().unwrap(), users);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_banned_snapshot_roundtrip() {
        let (store, dir) = scratch_store();

        let banned: BTreeSet<String> = ["bob".to_string()].into();
        store.save_banned(&banned).unwrap();
        assert_eq!(store.load_banned().unwrap(), banned);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_snapshot_format_matches_wire_names() {
        let (store, dir) = scratch_store();

        let mut users = BTreeMap::new();
        users.insert("alice".to_string(), UserRecord::new("pw1"));
        store.save_users(&users).unwrap();

        let contents = fs::read_to_string(dir.join("users.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["users"]["alice"]["password"], "pw1");
        assert_eq!(value["users"]["alice"]["is_admin"], false);
        assert!(contents.ends_with('\n'));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_snapshot_is_an_error() {
        let (store, dir) = scratch_store();

        assert!(matches!(store.load_users(), Err(StoreError::Io(_))));
        assert!(matches!(store.load_banned(), Err(StoreError::Io(_))));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_garbage_snapshot_is_an_error() {
        let (store, dir) = scratch_store();

        fs::write(dir.join("users.json"), "not json").unwrap();
        assert!(matches!(store.load_users(), Err(StoreError::Malformed(_))));

        fs::remove_dir_all(dir).unwrap();
    }
}
