use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::errors::FetchError;

/// One segment of a subscription key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Int(n)
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        KeyPart::Bool(b)
    }
}

impl std::fmt::Display for KeyPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPart::Str(s) => f.write_str(s),
            KeyPart::Int(n) => write!(f, "{}", n),
            KeyPart::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Ordered tuple of primitive values identifying one cacheable data source.
///
/// Two subscriptions with equal keys are the same logical source and share
/// cached state. Keys support prefix matching so a mutation can invalidate
/// every filter combination of a resource list at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceKey(Vec<KeyPart>);

impl SourceKey {
    /// Key with a single leading part, typically the resource name.
    pub fn root(part: impl Into<KeyPart>) -> Self {
        Self(vec![part.into()])
    }

    /// Append a part, builder-style.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// True if `prefix` is a leading subsequence of this key.
    pub fn starts_with(&self, prefix: &SourceKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str("/")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}

/// Payload flowing through the scheduler: decoded JSON from the remote.
pub type Payload = serde_json::Value;

/// Fetch function for one data source. Each invocation is one request.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Payload, FetchError>> + Send + Sync>;

/// Pure function of the most recent payload, re-evaluated after every
/// successful fetch, that picks the next refresh interval.
pub type IntervalPolicy = Arc<dyn Fn(&Payload) -> Duration + Send + Sync>;

/// Update delivered to subscribers of a data source.
#[derive(Debug, Clone)]
pub enum SourceUpdate {
    /// A payload, either freshly fetched or served from cache on subscribe.
    Snapshot {
        payload: Payload,
        fetched_at: Option<DateTime<Utc>>,
        stale: bool,
    },
    /// A fetch failed. The subscription stays alive; `last_known` carries
    /// the last-known-good cached value, if any.
    FetchFailed {
        error: FetchError,
        last_known: Option<Payload>,
    },
}
