//! Adaptive polling scheduler.
//!
//! Screens subscribe to a data source by key; the scheduler fetches,
//! inspects the payload through the subscription's interval policy to pick
//! the next refresh interval, and re-arms a timer. Invalidations (from the
//! mutation protocol) mark cached results stale and shorten the next poll
//! instead of forcing a synchronous re-fetch.

pub mod errors;
pub mod policy;
pub mod service;
pub mod source;
pub mod types;

pub use errors::FetchError;
pub use service::{Scheduler, SubscriptionHandle};
pub use types::{Fetcher, IntervalPolicy, KeyPart, Payload, SourceKey, SourceUpdate};
