//! Per-key cache and fetch bookkeeping.
//!
//! `SourceState` is the pure core of the scheduler: it tracks the cached
//! payload, the staleness flag, and the generation counter that implements
//! last-request-wins ordering. All timer and task wiring lives in
//! `scheduler::service`; everything here is synchronous and directly
//! testable.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::scheduler::errors::FetchError;
use crate::scheduler::types::Payload;

/// What happened when a fetch completion was applied to the state.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The completion was the latest generation; the cache was updated.
    Applied {
        payload: Payload,
        refetch_needed: bool,
    },
    /// The fetch failed. The cached value is untouched and the previous
    /// interval stays in effect.
    Failed {
        error: FetchError,
        refetch_needed: bool,
    },
    /// The completion belonged to a superseded generation and was dropped.
    DiscardedStale { refetch_needed: bool },
}

/// Cache and fetch state for one subscription key.
#[derive(Debug, Clone)]
pub struct SourceState {
    /// Most recently delivered payload (may be an optimistic overlay).
    pub last_result: Option<Payload>,
    /// Last payload confirmed by a successful fetch; optimistic overlays
    /// roll back to this.
    confirmed_result: Option<Payload>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Interval computed by the policy after the last successful fetch.
    pub next_interval: Option<Duration>,
    /// Set by invalidation, cleared by the next successful latest-generation
    /// fetch.
    pub stale: bool,
    /// Monotonic generation for this key. Bumped on every invalidation;
    /// completions carrying an older generation are discarded.
    generation: u64,
    /// Generation of the outstanding fetch, if one is in flight.
    in_flight: Option<u64>,
    /// A refetch was requested while a fetch was outstanding; honored once
    /// that fetch settles.
    refetch_pending: bool,
}

impl SourceState {
    pub fn new() -> Self {
        Self {
            last_result: None,
            confirmed_result: None,
            last_fetched_at: None,
            next_interval: None,
            stale: true,
            generation: 0,
            in_flight: None,
            refetch_pending: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Record the start of a fetch. Returns the generation to tag the
    /// request with, or `None` if one is already outstanding (the caller
    /// must skip, not queue).
    pub fn begin_fetch(&mut self) -> Option<u64> {
        if self.in_flight.is_some() {
            return None;
        }
        self.in_flight = Some(self.generation);
        Some(self.generation)
    }

    /// Mark the cached value stale and supersede any outstanding fetch.
    /// Returns the new generation.
    pub fn invalidate(&mut self) -> u64 {
        self.generation += 1;
        self.stale = true;
        if self.in_flight.is_some() {
            self.refetch_pending = true;
        }
        self.generation
    }

    /// Request an out-of-band refetch without changing the generation.
    /// Returns `true` if the caller should start a fetch now; `false` means
    /// one is outstanding and the refetch is deferred until it settles.
    pub fn request_refetch(&mut self) -> bool {
        if self.in_flight.is_some() {
            self.refetch_pending = true;
            return false;
        }
        true
    }

    /// Apply a settled fetch tagged with `generation`.
    pub fn complete_fetch(
        &mut self,
        generation: u64,
        outcome: Result<Payload, FetchError>,
        fetched_at: DateTime<Utc>,
    ) -> Completion {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
        }

        if generation != self.generation {
            return Completion::DiscardedStale {
                refetch_needed: std::mem::take(&mut self.refetch_pending),
            };
        }

        match outcome {
            Ok(payload) => {
                self.last_result = Some(payload.clone());
                self.confirmed_result = Some(payload.clone());
                self.last_fetched_at = Some(fetched_at);
                self.stale = false;
                Completion::Applied {
                    payload,
                    refetch_needed: std::mem::take(&mut self.refetch_pending),
                }
            }
            Err(error) => Completion::Failed {
                error,
                refetch_needed: std::mem::take(&mut self.refetch_pending),
            },
        }
    }

    /// Overlay an optimistic payload. The confirmed value is kept for
    /// rollback.
    pub fn apply_optimistic(&mut self, payload: Payload) {
        self.last_result = Some(payload);
    }

    /// Roll the cache back to the last confirmed payload.
    pub fn revert_optimistic(&mut self) {
        self.last_result = self.confirmed_result.clone();
    }
}

impl Default for SourceState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_new_state_is_stale_with_no_cache() {
        let state = SourceState::new();
        assert!(state.stale);
        assert!(state.last_result.is_none());
        assert!(!state.is_in_flight());
    }

    #[test]
    fn test_begin_fetch_serializes_per_key() {
        let mut state = SourceState::new();
        assert_eq!(state.begin_fetch(), Some(0));
        // Second fetch while one is outstanding is skipped, not queued
        assert_eq!(state.begin_fetch(), None);
    }

    #[test]
    fn test_successful_fetch_clears_staleness() {
        let mut state = SourceState::new();
        let generation = state.begin_fetch().unwrap();
        let completion = state.complete_fetch(generation, Ok(json!([1])), now());
        assert!(matches!(completion, Completion::Applied { .. }));
        assert!(!state.stale);
        assert_eq!(state.last_result, Some(json!([1])));
        assert!(state.last_fetched_at.is_some());
        assert!(!state.is_in_flight());
    }

    #[test]
    fn test_failed_fetch_keeps_last_result() {
        let mut state = SourceState::new();
        let generation = state.begin_fetch().unwrap();
        state.complete_fetch(generation, Ok(json!({"v": 1})), now());

        let generation = state.begin_fetch().unwrap();
        let completion = state.complete_fetch(
            generation,
            Err(FetchError::Network {
                message: "timeout".to_string(),
            }),
            now(),
        );
        assert!(matches!(completion, Completion::Failed { .. }));
        assert_eq!(state.last_result, Some(json!({"v": 1})));
        assert!(!state.stale);
    }

    #[test]
    fn test_invalidate_supersedes_in_flight_fetch() {
        let mut state = SourceState::new();
        let old_generation = state.begin_fetch().unwrap();
        let new_generation = state.invalidate();
        assert!(new_generation > old_generation);
        assert!(state.stale);

        let completion = state.complete_fetch(old_generation, Ok(json!("old")), now());
        assert_eq!(
            completion,
            Completion::DiscardedStale {
                refetch_needed: true
            }
        );
        // The superseded result never touched the cache
        assert_eq!(state.last_result, None);
        assert!(state.stale);
    }

    #[test]
    fn test_cache_reflects_highest_generation_request() {
        // Scenario: update mutation invalidates (G1) and its refetch starts;
        // a delete mutation invalidates again (G2) before G1's refetch
        // completes. G1's completion must be discarded.
        let mut state = SourceState::new();
        let g0 = state.begin_fetch().unwrap();
        state.complete_fetch(g0, Ok(json!({"name": "original"})), now());

        state.invalidate();
        let g1 = state.begin_fetch().unwrap();
        state.invalidate(); // G2 issued while G1's refetch is outstanding

        let completion = state.complete_fetch(g1, Ok(json!({"name": "updated"})), now());
        assert!(matches!(completion, Completion::DiscardedStale { .. }));
        assert_eq!(state.last_result, Some(json!({"name": "original"})));

        // G2's refetch lands and wins
        let g2 = state.begin_fetch().unwrap();
        let completion = state.complete_fetch(g2, Ok(json!({"deleted": true})), now());
        assert!(matches!(completion, Completion::Applied { .. }));
        assert_eq!(state.last_result, Some(json!({"deleted": true})));
        assert!(!state.stale);
    }

    #[test]
    fn test_staleness_never_true_after_latest_generation_fetch() {
        let mut state = SourceState::new();
        for _ in 0..5 {
            state.invalidate();
            let generation = state.begin_fetch().unwrap();
            state.complete_fetch(generation, Ok(json!(1)), now());
            assert!(!state.stale);
        }
    }

    #[test]
    fn test_refetch_request_deferred_while_in_flight() {
        let mut state = SourceState::new();
        assert!(state.request_refetch()); // nothing outstanding, start now

        let generation = state.begin_fetch().unwrap();
        assert!(!state.request_refetch()); // deferred
        let completion = state.complete_fetch(generation, Ok(json!(1)), now());
        assert_eq!(
            completion,
            Completion::Applied {
                payload: json!(1),
                refetch_needed: true
            }
        );
    }

    #[test]
    fn test_optimistic_overlay_and_rollback() {
        let mut state = SourceState::new();
        let generation = state.begin_fetch().unwrap();
        state.complete_fetch(generation, Ok(json!({"count": 3})), now());

        state.apply_optimistic(json!({"count": 4}));
        assert_eq!(state.last_result, Some(json!({"count": 4})));

        state.revert_optimistic();
        assert_eq!(state.last_result, Some(json!({"count": 3})));
    }

    #[test]
    fn test_rollback_with_no_confirmed_value_clears_cache() {
        let mut state = SourceState::new();
        state.apply_optimistic(json!("speculative"));
        state.revert_optimistic();
        assert_eq!(state.last_result, None);
    }
}
