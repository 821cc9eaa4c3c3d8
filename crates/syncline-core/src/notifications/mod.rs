//! Bounded notification log.

pub mod log;
pub mod types;

pub use log::NotificationLog;
pub use types::{NotificationEntry, NotificationKind};
