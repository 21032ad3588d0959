//! Key-value backing stores for the persisted selection

use crate::error::{PersistenceError, PersistenceResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A durable string key-value store (the local-storage role)
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> PersistenceResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> PersistenceResult<()>;
    fn remove(&self, key: &str) -> PersistenceResult<()>;
}

/// In-memory store; lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PersistenceResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk, one file per profile
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> PersistenceResult<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Current entries for a write; a corrupt file is replaced
    fn read_for_write(&self) -> PersistenceResult<BTreeMap<String, String>> {
        match self.read_all() {
            Err(PersistenceError::Corrupt(err)) => {
                tracing::warn!(path = ?self.path, error = %err, "overwriting corrupt selection profile");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> PersistenceResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStorage {
    fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_for_write()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> PersistenceResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_for_write()?;
        entries.remove(key);
        self.write_all(&entries)
    }
}

/// A store that refuses every operation, like storage in a sandboxed frame
#[derive(Debug, Default)]
pub struct DisabledStorage;

impl KeyValueStore for DisabledStorage {
    fn get(&self, _key: &str) -> PersistenceResult<Option<String>> {
        Err(PersistenceError::Unavailable("storage is disabled".to_string()))
    }

    fn set(&self, _key: &str, _value: &str) -> PersistenceResult<()> {
        Err(PersistenceError::Unavailable("storage is disabled".to_string()))
    }

    fn remove(&self, _key: &str) -> PersistenceResult<()> {
        Err(PersistenceError::Unavailable("storage is disabled".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v".to_string()));

        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn test_json_file_storage_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profile").join("state.json");

        JsonFileStorage::new(&path).set("widget", "chart").unwrap();

        let reopened = JsonFileStorage::new(&path);
        assert_eq!(reopened.get("widget").unwrap(), Some("chart".to_string()));
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn test_json_file_storage_reports_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let storage = JsonFileStorage::new(&path);
        assert!(matches!(storage.get("widget"), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn test_json_file_storage_recovers_from_corruption_on_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ truncated").unwrap();

        let storage = JsonFileStorage::new(&path);
        storage.set("widget", "chart").unwrap();
        assert_eq!(storage.get("widget").unwrap(), Some("chart".to_string()));

        let reopened = JsonFileStorage::new(&path);
        assert_eq!(reopened.get("widget").unwrap(), Some("chart".to_string()));

        std::fs::write(&path, "{ truncated").unwrap();
        storage.remove("widget").unwrap();
        assert_eq!(storage.get("widget").unwrap(), None);
    }

    #[test]
    fn test_disabled_storage_fails() {
        assert!(DisabledStorage.set("k", "v").is_err());
        assert!(DisabledStorage.get("k").is_err());
    }
}
