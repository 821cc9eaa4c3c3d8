//! syncline-core: Live state synchronization for the consultant dashboard
//!
//! This library keeps dashboard screens consistent with the messaging
//! backend without manual refreshes. It is used by both the desktop shell
//! and the headless test harness.
//!
//! # Main Entry Points
//!
//! - [`scheduler`] - Adaptive polling with shared, invalidation-aware caches
//! - [`pairing`] - Device pairing lifecycle and credential handshake
//! - [`mutation`] - Mutation-triggered cache invalidation protocol
//! - [`notifications`] - Bounded, partially persisted notification log
//! - [`config`] - Configuration management

pub mod config;
pub mod errors;
pub mod logging;
pub mod mutation;
pub mod notifications;
pub mod pairing;
pub mod scheduler;
pub mod storage;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use config::{CoreConfig, NotificationConfig, PairingConfig, SchedulerConfig};
pub use errors::{SynclineError, SynclineResult};
pub use mutation::{MutationRunner, MutationSpec};
pub use notifications::{NotificationEntry, NotificationKind, NotificationLog};
pub use pairing::{
    Credential, PairingApi, PairingError, PairingEvent, PairingService, PairingState,
};
pub use scheduler::{
    FetchError, Fetcher, IntervalPolicy, KeyPart, Payload, Scheduler, SourceKey, SourceUpdate,
    SubscriptionHandle,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use transport::{ApiResponse, Method, Transport, TransportError};

// Re-export logging initialization
pub use logging::init_logging;
