//! Configuration management for the sync core.

pub mod loading;
pub mod types;

pub use loading::{load_hierarchy, merge_configs};
pub use types::{CoreConfig, NotificationConfig, PairingConfig, SchedulerConfig};
