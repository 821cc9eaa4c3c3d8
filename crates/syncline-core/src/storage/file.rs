//! JSON-file-backed key-value store.
//!
//! Each name maps to `<root>/<name>.json`. The default root is
//! `~/.syncline/store`.

use crate::storage::{KeyValueStore, StorageError};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store rooted at `~/.syncline/store`.
    pub fn default_location() -> Result<Self, std::io::Error> {
        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not find home directory",
            )
        })?;
        Ok(Self::new(home.join(".syncline").join("store")))
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, name: &str) -> Option<Value> {
        let path = self.path_for(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(
                    event = "core.storage.read_failed",
                    name = name,
                    file_path = %path.display(),
                    error = %e,
                    "Could not read stored value - treating as absent"
                );
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    event = "core.storage.parse_failed",
                    name = name,
                    file_path = %path.display(),
                    error = %e,
                    "Stored value is corrupted - treating as absent"
                );
                None
            }
        }
    }

    fn set(&self, name: &str, value: &Value) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|e| StorageError::IoError {
            name: name.to_string(),
            source: e,
        })?;
        let content =
            serde_json::to_string_pretty(value).map_err(|e| StorageError::SerializationError {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        fs::write(self.path_for(name), content).map_err(|e| StorageError::IoError {
            name: name.to_string(),
            source: e,
        })
    }

    fn remove(&self, name: &str) {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    event = "core.storage.remove_failed",
                    name = name,
                    file_path = %path.display(),
                    error = %e,
                    "Could not remove stored value"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());

        store.set("auth_token", &json!({"token": "abc"})).unwrap();
        assert_eq!(store.get("auth_token"), Some(json!({"token": "abc"})));
    }

    #[test]
    fn test_get_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_get_corrupt_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert_eq!(store.get("bad"), None);
    }

    #[test]
    fn test_remove_then_get_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.set("k", &json!(1)).unwrap();
        store.remove("k");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_remove_absent_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.remove("never_set");
    }
}
