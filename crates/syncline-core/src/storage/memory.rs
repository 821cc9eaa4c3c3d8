//! In-memory key-value store, used by tests and as a fallback when no
//! durable location is available.

use crate::storage::{KeyValueStore, StorageError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn set(&self, name: &str, value: &Value) -> Result<(), StorageError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, name: &str) {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }
}
