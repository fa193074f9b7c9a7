//! Durable key/value storage for the session record.
//!
//! SYSTEM CONTEXT
//! ==============
//! The session store writes the record here on every mutation and reads it
//! once at startup. The API client reads only the token, straight from
//! storage, so it never has to reach into the session store.
//!
//! RECORD ENCODING
//! ===============
//! `jwt_token` holds the raw bearer token. `user` holds a JSON object
//! `{"username": "...", "is_admin": <bool>}`; the admin flag is always a JSON
//! boolean. A record with only one of the two keys, an empty token, or a
//! `user` value of any other shape is malformed.

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

pub const TOKEN_KEY: &str = "jwt_token";
pub const USER_KEY: &str = "user";

/// Keys written by older clients that stored the username and admin flag
/// separately. Removed on clear so they cannot outlive a logout.
const LEGACY_KEYS: [&str; 2] = ["username", "is_admin"];

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backing file could not be read or written.
    #[error("storage io failed: {0}")]
    Io(#[from] io::Error),

    /// Stored data exists but does not decode into the expected shape.
    #[error("malformed session record: {0}")]
    Malformed(String),

    /// A value could not be serialized for storage.
    #[error("storage encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

// =============================================================================
// BACKENDS
// =============================================================================

/// Key/value store that survives process restarts (or, for
/// [`MemoryStorage`], the lifetime of the value).
pub trait SessionStorage: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage. Nothing survives the value being dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Storage backed by a single JSON object file.
///
/// A missing file reads as empty. Reading an unparseable file is
/// [`StorageError::Malformed`]; the next write discards it. Writes go to a
/// sibling temp file that is then renamed over the target, and the file is
/// deleted once its last key is removed.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| StorageError::Malformed(format!("{}: {e}", self.path.display())))
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if map.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // An unreadable file is replaced rather than left to fail every write.
        let (mut map, unreadable) = match self.read_map() {
            Ok(map) => (map, false),
            Err(StorageError::Malformed(reason)) => {
                tracing::warn!(path = %self.path.display(), %reason, "discarding unreadable session file");
                (BTreeMap::new(), true)
            }
            Err(e) => return Err(e),
        };
        if apply(&mut map) || unreadable {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|map| {
            map.insert(key.to_owned(), value.to_owned());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|map| map.remove(key).is_some())
    }
}

// =============================================================================
// SESSION RECORD
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StoredUser {
    username: String,
    is_admin: bool,
}

/// The durable copy of an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub token: String,
    pub username: String,
    pub is_admin: bool,
}

impl PersistedSession {
    /// Read the record. `Ok(None)` means no session was ever stored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Malformed`] when the stored keys exist but do
    /// not form a valid record, or any backend error.
    pub fn load(storage: &dyn SessionStorage) -> Result<Option<Self>, StorageError> {
        let token = storage.get(TOKEN_KEY)?;
        let user = storage.get(USER_KEY)?;

        let (token, user) = match (token, user) {
            (None, None) => return Ok(None),
            (Some(token), Some(user)) => (token, user),
            (Some(_), None) => return Err(StorageError::Malformed(format!("`{TOKEN_KEY}` present without `{USER_KEY}`"))),
            (None, Some(_)) => return Err(StorageError::Malformed(format!("`{USER_KEY}` present without `{TOKEN_KEY}`"))),
        };

        if token.trim().is_empty() {
            return Err(StorageError::Malformed(format!("`{TOKEN_KEY}` is empty")));
        }
        let user: StoredUser =
            serde_json::from_str(&user).map_err(|e| StorageError::Malformed(format!("`{USER_KEY}`: {e}")))?;
        if user.username.trim().is_empty() {
            return Err(StorageError::Malformed("username is empty".to_owned()));
        }

        Ok(Some(Self { token, username: user.username, is_admin: user.is_admin }))
    }

    /// Write the record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if encoding or the backend write fails.
    pub fn save(&self, storage: &dyn SessionStorage) -> Result<(), StorageError> {
        let user = serde_json::to_string(&StoredUser { username: self.username.clone(), is_admin: self.is_admin })?;
        storage.set(USER_KEY, &user)?;
        storage.set(TOKEN_KEY, &self.token)?;
        Ok(())
    }

    /// Remove the record, including keys left behind by older clients.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend write fails.
    pub fn clear(storage: &dyn SessionStorage) -> Result<(), StorageError> {
        storage.remove(TOKEN_KEY)?;
        storage.remove(USER_KEY)?;
        for key in LEGACY_KEYS {
            storage.remove(key)?;
        }
        Ok(())
    }
}

/// Read just the bearer token. Empty tokens read as absent.
///
/// # Errors
///
/// Returns a [`StorageError`] if the backend cannot be read.
pub fn read_token(storage: &dyn SessionStorage) -> Result<Option<String>, StorageError> {
    Ok(storage.get(TOKEN_KEY)?.filter(|token| !token.trim().is_empty()))
}
