//! Bounded, persisted notification log.
//!
//! In-memory ring of the most recent entries (newest first), capped at
//! `max_entries`. A smaller prefix (`persisted_entries`) survives process
//! restarts through the key-value store; entries beyond that prefix are
//! rebuilt only by new appends, never recovered.

use crate::config::NotificationConfig;
use crate::notifications::types::{NotificationEntry, NotificationKind};
use crate::storage::KeyValueStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

const STORE_KEY: &str = "notification_log";

pub struct NotificationLog {
    entries: Vec<NotificationEntry>,
    store: Arc<dyn KeyValueStore>,
    config: NotificationConfig,
}

impl NotificationLog {
    /// Create an empty log backed by the given store.
    pub fn new(store: Arc<dyn KeyValueStore>, config: NotificationConfig) -> Self {
        Self {
            entries: Vec::new(),
            store,
            config,
        }
    }

    /// Rebuild the log from the persisted subset.
    ///
    /// Missing or corrupt persisted data yields an empty log.
    pub fn load(store: Arc<dyn KeyValueStore>, config: NotificationConfig) -> Self {
        let entries = match store.get(STORE_KEY) {
            Some(value) => match serde_json::from_value::<Vec<NotificationEntry>>(value) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        event = "core.notifications.load_failed",
                        error = %e,
                        "Persisted notification log is corrupted - starting empty"
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        debug!(
            event = "core.notifications.loaded",
            count = entries.len(),
        );
        Self {
            entries,
            store,
            config,
        }
    }

    /// Append a new entry, assigning its id and timestamp.
    ///
    /// The log is truncated to `max_entries`; oldest entries are silently
    /// dropped. Returns the appended entry.
    pub fn append(
        &mut self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> NotificationEntry {
        let entry = NotificationEntry {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            read: false,
            created_at: Utc::now(),
        };
        self.entries.insert(0, entry.clone());
        self.entries.truncate(self.config.max_entries());
        self.persist();
        entry
    }

    /// Mark one entry as read. Returns `false` if the id is unknown.
    ///
    /// The entry is replaced by a copy rather than mutated in place.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        if !self.entries[pos].read {
            self.entries[pos] = NotificationEntry {
                read: true,
                ..self.entries[pos].clone()
            };
            self.persist();
        }
        true
    }

    /// Mark every entry as read.
    pub fn mark_all_read(&mut self) {
        if self.entries.iter().all(|e| e.read) {
            return;
        }
        self.entries = self
            .entries
            .iter()
            .map(|e| NotificationEntry {
                read: true,
                ..e.clone()
            })
            .collect();
        self.persist();
    }

    /// Remove one entry. Returns `false` if the id is unknown.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.clear();
        self.persist();
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.read).count()
    }

    /// Entries, most recent first.
    pub fn entries(&self) -> &[NotificationEntry] {
        &self.entries
    }

    /// Persist the newest `persisted_entries` entries. Best-effort: failures
    /// are logged, the in-memory log stays authoritative.
    fn persist(&self) {
        let subset = &self.entries[..self.entries.len().min(self.config.persisted_entries())];
        let value = match serde_json::to_value(subset) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    event = "core.notifications.persist_failed",
                    error = %e,
                    "Could not serialize notification log"
                );
                return;
            }
        };
        if let Err(e) = self.store.set(STORE_KEY, &value) {
            warn!(
                event = "core.notifications.persist_failed",
                error = %e,
                "Could not persist notification log"
            );
        }
    }
}
