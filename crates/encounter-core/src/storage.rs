//! Durable key/value storage for tracker state.
//!
//! Every piece of persisted state lives under its own namespaced key (see the
//! `*_KEY` constants). [`JsonFileStore`] keeps one JSON file per key in the data
//! directory; [`MemoryStore`] keeps values in-process for tests and ephemeral runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EncounterError, Result};

/// Key namespace shared by everything the tracker persists.
pub const NAMESPACE: &str = "encounter";

/// Friend list CSV, as last set.
pub const FRIEND_LIST_KEY: &str = "encounter.friends";

/// Snapshot of every open encounter.
pub const SNAPSHOT_KEY: &str = "encounter.snapshot";

/// Outbound event backlog.
pub const EVENT_QUEUE_KEY: &str = "encounter.events";

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static pattern is valid"));

/// String-valued durable storage.
///
/// Implementations must make `put` durable before returning; the tracker
/// relies on that to avoid losing a transition across a crash.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be written durably.
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Get the default data directory.
///
/// On Linux devices: `/var/lib/encounter-tracker/`
/// Elsewhere: the platform data directory, or `./data` as a last resort.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/encounter-tracker")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "encounter-tracker")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}

fn check_key(key: &str) -> Result<()> {
    if KEY_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(EncounterError::InvalidStorageKey(key.to_string()))
    }
}

/// Storage backend writing one JSON document per key.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    /// Create a new store rooted at `data_dir`.
    ///
    /// The directory is created lazily on first write.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Directory holding the key files.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        check_key(key)?;
        let path = self.key_path(key);
        if path.exists() {
            Ok(Some(std::fs::read_to_string(path)?))
        } else {
            Ok(None)
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        std::fs::create_dir_all(&self.data_dir)?;

        // Write-then-rename so a crash never leaves a half-written document.
        let path = self.key_path(key);
        let tmp = self.data_dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            EncounterError::PersistenceError(format!(
                "Failed to replace {}: {e}",
                path.display()
            ))
        })?;
        Ok(())
    }
}

/// In-process storage backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        check_key(key)?;
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
