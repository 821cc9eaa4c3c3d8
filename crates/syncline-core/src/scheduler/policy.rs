//! Interval policy helpers.
//!
//! A policy is a pure function of the most recent payload. The dashboard's
//! common case: poll fast while any record is still running, back off once
//! everything has settled.

use crate::scheduler::types::{IntervalPolicy, Payload};
use std::sync::Arc;
use std::time::Duration;

/// Fast interval used while work is in progress.
pub const FAST_POLL: Duration = Duration::from_millis(5_000);

/// Slow interval used once everything has settled.
pub const SLOW_POLL: Duration = Duration::from_millis(30_000);

/// Policy that always returns the same interval.
pub fn fixed(interval: Duration) -> IntervalPolicy {
    Arc::new(move |_: &Payload| interval)
}

/// Policy returning `fast` while any record in the payload has
/// `status == "running"`, `slow` otherwise.
pub fn running_aware(fast: Duration, slow: Duration) -> IntervalPolicy {
    Arc::new(move |payload: &Payload| {
        if payload_has_running(payload) {
            fast
        } else {
            slow
        }
    })
}

/// True if any record in the payload carries `status: "running"`.
///
/// Accepts either a bare array or an object with an `items` array, which is
/// how the list endpoints shape paginated responses.
pub fn payload_has_running(payload: &Payload) -> bool {
    let items = match payload {
        Payload::Array(items) => items.as_slice(),
        Payload::Object(map) => match map.get("items").and_then(Payload::as_array) {
            Some(items) => items.as_slice(),
            None => return false,
        },
        _ => return false,
    };
    items
        .iter()
        .any(|item| item.get("status").and_then(Payload::as_str) == Some("running"))
}
