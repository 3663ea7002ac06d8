//! Durable key-value state that outlives a session: the chat id assigned by
//! the server and whether the user completed registration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;

pub const CHAT_ID_KEY: &str = "chat_id";
pub const REGISTERED_KEY: &str = "is_registered";

/// String-keyed persistent storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Volatile store, for tests and hosts without a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. A missing file is an
    /// empty store; an unreadable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened state store at {:?} ({} keys)", path, entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// Typed view over the two persisted fields.
///
/// Write failures are logged and otherwise ignored.
#[derive(Clone)]
pub struct DurableState {
    store: Arc<dyn KeyValueStore>,
}

impl DurableState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The stored chat id, if any. Empty strings count as absent.
    pub fn chat_id(&self) -> Option<String> {
        self.store.get(CHAT_ID_KEY).filter(|id| !id.is_empty())
    }

    pub fn set_chat_id(&self, chat_id: &str) {
        if let Err(e) = self.store.set(CHAT_ID_KEY, chat_id) {
            warn!("Failed to persist chat id: {}", e);
        }
    }

    pub fn clear_chat_id(&self) {
        if let Err(e) = self.store.remove(CHAT_ID_KEY) {
            warn!("Failed to clear chat id: {}", e);
        }
    }

    pub fn is_registered(&self) -> bool {
        self.store
            .get(REGISTERED_KEY)
            .is_some_and(|v| v == "true")
    }

    pub fn set_registered(&self, registered: bool) {
        let result = if registered {
            self.store.set(REGISTERED_KEY, "true")
        } else {
            self.store.remove(REGISTERED_KEY)
        };
        if let Err(e) = result {
            warn!("Failed to persist registration flag: {}", e);
        }
    }

    pub fn clear_registration(&self) {
        self.set_registered(false);
    }
}
