//! Persisted key-value storage.
//!
//! Durability collaborator for the notification log and session bootstrap.
//! Reads are best-effort: any failure (missing file, corrupt JSON, IO error)
//! degrades to "absent value" and is logged, never propagated.

pub mod errors;
pub mod file;
pub mod memory;

pub use errors::StorageError;
pub use file::FileStore;
pub use memory::MemoryStore;

use serde_json::Value;

/// Abstract persisted key-value store.
///
/// `get` returns `None` both for absent and unreadable values; only `set`
/// reports failures, and callers are expected to treat those as non-fatal.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, name: &str) -> Option<Value>;
    fn set(&self, name: &str, value: &Value) -> Result<(), StorageError>;
    fn remove(&self, name: &str);
}
