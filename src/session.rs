use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Persistent store entry holding the serialized end-user identity.
pub const USER_KEY: &str = "session.user";
/// Ephemeral store entry holding the administrator flag.
pub const ADMIN_KEY: &str = "session.admin";

/// Error returned by a key/value backend.
#[derive(Debug)]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal string key/value storage used for both session domains.
///
/// Reads are synchronous; implementations must be cheap to call from a
/// request handler.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn clear(&self, key: &str) -> StoreResult<()>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Process-lifetime store. Everything is gone when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> StoreResult<()> {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(key);
        Ok(())
    }
}

/// JSON-file backed store that survives restarts.
///
/// The whole map is rewritten on every mutation via a temp file and rename,
/// so a crash never leaves a half-written document behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create session directory {}", parent.display())
                })?;
            }
        }

        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(?err, file = %path.display(), "session file is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read session file {}", path.display()));
            }
        };

        debug!(file = %path.display(), entries = entries.len(), "session store opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        let body = serde_json::to_string_pretty(entries)
            .map_err(|err| StoreError::new(format!("failed to encode session file: {err}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body)
            .map_err(|err| StoreError::new(format!("failed to write session file: {err}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|err| StoreError::new(format!("failed to replace session file: {err}")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = guard.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&guard) {
            match previous {
                Some(old) => guard.insert(key.to_string(), old),
                None => guard.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn clear(&self, key: &str) -> StoreResult<()> {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(previous) = guard.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&guard) {
            guard.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_round_trip_and_clear() {
        let store = MemoryStore::new();
        assert_eq!(store.get(ADMIN_KEY).unwrap(), None);
        store.set(ADMIN_KEY, "true").unwrap();
        assert_eq!(store.get(ADMIN_KEY).unwrap().as_deref(), Some("true"));
        store.clear(ADMIN_KEY).unwrap();
        store.clear(ADMIN_KEY).unwrap();
        assert_eq!(store.get(ADMIN_KEY).unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set(USER_KEY, r#"{"id":"user-1"}"#).unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(USER_KEY).unwrap().as_deref(),
            Some(r#"{"id":"user-1"}"#)
        );

        reopened.clear(USER_KEY).unwrap();
        let again = FileStore::open(&path).unwrap();
        assert_eq!(again.get(USER_KEY).unwrap(), None);
    }

    #[test]
    fn file_store_ignores_corrupt_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(USER_KEY).unwrap(), None);
    }
}
