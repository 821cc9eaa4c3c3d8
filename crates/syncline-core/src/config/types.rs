use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the sync core.
///
/// All fields have sensible defaults; a missing config file is not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Tunables for the adaptive polling scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a cached result outlives its last subscriber, in milliseconds.
    pub cache_grace_ms: Option<u64>,
    /// Interval reused after a fetch failure when no interval has been
    /// computed yet, in milliseconds.
    pub retry_interval_ms: Option<u64>,
}

impl SchedulerConfig {
    pub fn cache_grace(&self) -> Duration {
        Duration::from_millis(self.cache_grace_ms.unwrap_or(30_000))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.unwrap_or(30_000))
    }
}

/// Tunables for the device pairing state machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Validity window of an issued pairing credential, in seconds.
    pub credential_ttl_secs: Option<i64>,
    /// Local countdown tick, in milliseconds.
    pub tick_ms: Option<u64>,
    /// Status poll interval while a credential is awaiting scan, in seconds.
    pub scan_poll_secs: Option<u64>,
    /// Status poll interval while a device is linked, in seconds.
    pub linked_poll_secs: Option<u64>,
}

impl PairingConfig {
    pub fn credential_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.credential_ttl_secs.unwrap_or(45))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.unwrap_or(1_000))
    }

    pub fn scan_poll(&self) -> Duration {
        Duration::from_secs(self.scan_poll_secs.unwrap_or(3))
    }

    pub fn linked_poll(&self) -> Duration {
        Duration::from_secs(self.linked_poll_secs.unwrap_or(30))
    }
}

/// Tunables for the bounded notification log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Maximum number of entries retained in memory.
    pub max_entries: Option<usize>,
    /// Number of most-recent entries persisted across restarts.
    pub persisted_entries: Option<usize>,
}

impl NotificationConfig {
    pub fn max_entries(&self) -> usize {
        self.max_entries.unwrap_or(50)
    }

    pub fn persisted_entries(&self) -> usize {
        self.persisted_entries.unwrap_or(20)
    }
}
