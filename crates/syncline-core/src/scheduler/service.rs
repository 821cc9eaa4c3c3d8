//! Actor service wiring timers and fetch tasks around `SourceState`.
//!
//! The service task owns every `SourceState` exclusively; all cache
//! mutations happen inside one message-handling turn, so completions,
//! invalidations and timer ticks interleave without locks. Timers are
//! delayed self-messages tagged with an epoch; bumping the epoch cancels a
//! timer by making its eventual message a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::scheduler::errors::FetchError;
use crate::scheduler::source::{Completion, SourceState};
use crate::scheduler::types::{Fetcher, IntervalPolicy, Payload, SourceKey, SourceUpdate};

enum SchedulerMsg {
    Subscribe {
        key: SourceKey,
        fetcher: Fetcher,
        policy: IntervalPolicy,
        id: u64,
        update_tx: mpsc::UnboundedSender<SourceUpdate>,
    },
    Unsubscribe {
        key: SourceKey,
        id: u64,
    },
    ForceRefresh {
        key: SourceKey,
    },
    Invalidate {
        key: SourceKey,
    },
    InvalidatePrefix {
        prefix: SourceKey,
    },
    ApplyOptimistic {
        key: SourceKey,
        payload: Payload,
    },
    RevertOptimistic {
        key: SourceKey,
    },
    TimerFired {
        key: SourceKey,
        epoch: u64,
    },
    FetchSettled {
        key: SourceKey,
        generation: u64,
        outcome: Result<Payload, FetchError>,
        fetched_at: DateTime<Utc>,
    },
    Retire {
        key: SourceKey,
        epoch: u64,
    },
    Shutdown,
}

/// Handle to the scheduler service. Cheap to clone; all clones talk to the
/// same service task.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<SchedulerMsg>,
    next_subscriber_id: Arc<AtomicU64>,
}

/// One consumer of a data source.
///
/// Updates arrive through `recv`. Dropping the handle unsubscribes; the
/// service cancels the key's timer once its last subscriber is gone and
/// retires the cached value after the grace window.
pub struct SubscriptionHandle {
    key: SourceKey,
    id: u64,
    updates: mpsc::UnboundedReceiver<SourceUpdate>,
    tx: mpsc::UnboundedSender<SchedulerMsg>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// Next update for this source. `None` once the service shuts down.
    pub async fn recv(&mut self) -> Option<SourceUpdate> {
        self.updates.recv().await
    }

    /// Non-blocking variant of `recv`.
    pub fn try_recv(&mut self) -> Option<SourceUpdate> {
        self.updates.try_recv().ok()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(SchedulerMsg::Unsubscribe {
            key: self.key.clone(),
            id: self.id,
        });
    }
}

impl Scheduler {
    /// Spawn the scheduler service on the current runtime.
    pub fn spawn(config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = SchedulerService {
            entries: HashMap::new(),
            tx: tx.clone(),
            config,
        };
        tokio::spawn(service.run(rx));
        Self {
            tx,
            next_subscriber_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to a data source.
    ///
    /// If the key has no cached result or is marked stale, a fetch starts
    /// immediately; otherwise the cached result is delivered as the first
    /// update and background polling continues at the last computed
    /// interval. Duplicate subscribers of the same key share one fetch.
    pub fn subscribe(
        &self,
        key: SourceKey,
        fetcher: Fetcher,
        policy: IntervalPolicy,
    ) -> SubscriptionHandle {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (update_tx, updates) = mpsc::unbounded_channel();
        let _ = self.tx.send(SchedulerMsg::Subscribe {
            key: key.clone(),
            fetcher,
            policy,
            id,
            update_tx,
        });
        SubscriptionHandle {
            key,
            id,
            updates,
            tx: self.tx.clone(),
        }
    }

    /// Explicit unsubscribe; equivalent to dropping the handle.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        drop(handle);
    }

    /// Fetch a key out of band without marking it stale.
    pub fn force_refresh(&self, key: SourceKey) {
        let _ = self.tx.send(SchedulerMsg::ForceRefresh { key });
    }

    /// Mark a key stale. If it has subscribers an out-of-band fetch starts
    /// (deferred until any outstanding fetch settles); its generation is
    /// bumped so superseded completions are discarded.
    pub fn invalidate(&self, key: SourceKey) {
        let _ = self.tx.send(SchedulerMsg::Invalidate { key });
    }

    /// Invalidate every known key beginning with `prefix`.
    pub fn invalidate_prefix(&self, prefix: SourceKey) {
        let _ = self.tx.send(SchedulerMsg::InvalidatePrefix { prefix });
    }

    /// Overlay an optimistic payload on a key's cache.
    pub fn apply_optimistic(&self, key: SourceKey, payload: Payload) {
        let _ = self.tx.send(SchedulerMsg::ApplyOptimistic { key, payload });
    }

    /// Roll a key's cache back to the last confirmed payload.
    pub fn revert_optimistic(&self, key: SourceKey) {
        let _ = self.tx.send(SchedulerMsg::RevertOptimistic { key });
    }

    /// Stop the service task. Outstanding handles stop receiving updates.
    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerMsg::Shutdown);
    }
}

struct SourceEntry {
    state: SourceState,
    fetcher: Fetcher,
    policy: IntervalPolicy,
    subscribers: HashMap<u64, mpsc::UnboundedSender<SourceUpdate>>,
    /// Epoch of the currently armed timer; stale timer messages are ignored.
    timer_epoch: u64,
    timer_armed: bool,
    /// Epoch of the pending retirement, bumped on re-subscribe to cancel it.
    retire_epoch: u64,
}

impl SourceEntry {
    fn broadcast(&mut self, update: SourceUpdate) {
        self.subscribers
            .retain(|_, tx| tx.send(update.clone()).is_ok());
    }
}

/// What to do for a key after applying a completion, once the entry borrow
/// has been released.
enum FollowUp {
    Fetch,
    Timer(Duration),
    Nothing,
}

struct SchedulerService {
    entries: HashMap<SourceKey, SourceEntry>,
    tx: mpsc::UnboundedSender<SchedulerMsg>,
    config: SchedulerConfig,
}

impl SchedulerService {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SchedulerMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                SchedulerMsg::Subscribe {
                    key,
                    fetcher,
                    policy,
                    id,
                    update_tx,
                } => self.on_subscribe(key, fetcher, policy, id, update_tx),
                SchedulerMsg::Unsubscribe { key, id } => self.on_unsubscribe(key, id),
                SchedulerMsg::ForceRefresh { key } => self.on_force_refresh(key),
                SchedulerMsg::Invalidate { key } => self.on_invalidate(&key),
                SchedulerMsg::InvalidatePrefix { prefix } => self.on_invalidate_prefix(&prefix),
                SchedulerMsg::ApplyOptimistic { key, payload } => {
                    self.on_apply_optimistic(key, payload)
                }
                SchedulerMsg::RevertOptimistic { key } => self.on_revert_optimistic(key),
                SchedulerMsg::TimerFired { key, epoch } => self.on_timer_fired(key, epoch),
                SchedulerMsg::FetchSettled {
                    key,
                    generation,
                    outcome,
                    fetched_at,
                } => self.on_fetch_settled(key, generation, outcome, fetched_at),
                SchedulerMsg::Retire { key, epoch } => self.on_retire(key, epoch),
                SchedulerMsg::Shutdown => {
                    info!(event = "core.scheduler.shutdown");
                    break;
                }
            }
        }
    }

    fn on_subscribe(
        &mut self,
        key: SourceKey,
        fetcher: Fetcher,
        policy: IntervalPolicy,
        id: u64,
        update_tx: mpsc::UnboundedSender<SourceUpdate>,
    ) {
        let entry = self.entries.entry(key.clone()).or_insert_with(|| SourceEntry {
            state: SourceState::new(),
            fetcher,
            policy,
            subscribers: HashMap::new(),
            timer_epoch: 0,
            timer_armed: false,
            retire_epoch: 0,
        });
        let was_idle = entry.subscribers.is_empty();
        entry.subscribers.insert(id, update_tx);
        // Cancel a pending retirement
        entry.retire_epoch += 1;

        debug!(
            event = "core.scheduler.subscribed",
            key = %key,
            subscriber_id = id,
            subscriber_count = entry.subscribers.len(),
        );

        if entry.state.last_result.is_none() || entry.state.stale {
            self.start_fetch(&key);
            return;
        }

        // Serve the cached value in this turn, before any new fetch can
        // resolve.
        let snapshot = SourceUpdate::Snapshot {
            payload: entry
                .state
                .last_result
                .clone()
                .unwrap_or(Payload::Null),
            fetched_at: entry.state.last_fetched_at,
            stale: entry.state.stale,
        };
        if let Some(tx) = entry.subscribers.get(&id) {
            let _ = tx.send(snapshot);
        }

        let timer_armed = entry.timer_armed;
        let in_flight = entry.state.is_in_flight();
        let interval = entry
            .state
            .next_interval
            .unwrap_or(self.config.retry_interval());

        if was_idle {
            // Re-subscribe within the grace window: the stale-ish cache is
            // already on the wire, refresh in the background.
            self.start_fetch(&key);
        } else if !timer_armed && !in_flight {
            self.arm_timer(&key, interval);
        }
    }

    fn on_unsubscribe(&mut self, key: SourceKey, id: u64) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.subscribers.remove(&id);
        if !entry.subscribers.is_empty() {
            return;
        }

        // Last consumer gone: cancel the timer, retire the cache after the
        // grace window.
        entry.timer_epoch += 1;
        entry.timer_armed = false;
        entry.retire_epoch += 1;
        let epoch = entry.retire_epoch;
        let grace = self.config.cache_grace();
        let tx = self.tx.clone();
        debug!(
            event = "core.scheduler.source_idle",
            key = %key,
            grace_ms = grace.as_millis() as u64,
        );
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(SchedulerMsg::Retire { key, epoch });
        });
    }

    fn on_retire(&mut self, key: SourceKey, epoch: u64) {
        let Some(entry) = self.entries.get(&key) else {
            return;
        };
        if entry.retire_epoch != epoch || !entry.subscribers.is_empty() {
            return;
        }
        self.entries.remove(&key);
        debug!(event = "core.scheduler.source_retired", key = %key);
    }

    fn on_force_refresh(&mut self, key: SourceKey) {
        let Some(entry) = self.entries.get_mut(&key) else {
            debug!(event = "core.scheduler.refresh_unknown_key", key = %key);
            return;
        };
        if entry.state.request_refetch() {
            self.start_fetch(&key);
        }
    }

    fn on_invalidate(&mut self, key: &SourceKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            debug!(event = "core.scheduler.invalidate_unknown_key", key = %key);
            return;
        };
        let generation = entry.state.invalidate();
        let start_now = !entry.subscribers.is_empty() && !entry.state.is_in_flight();
        info!(
            event = "core.scheduler.invalidated",
            key = %key,
            generation = generation,
        );
        if start_now {
            self.start_fetch(key);
        }
    }

    fn on_invalidate_prefix(&mut self, prefix: &SourceKey) {
        let matching: Vec<SourceKey> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        debug!(
            event = "core.scheduler.invalidate_prefix",
            prefix = %prefix,
            matched = matching.len(),
        );
        for key in matching {
            self.on_invalidate(&key);
        }
    }

    fn on_apply_optimistic(&mut self, key: SourceKey, payload: Payload) {
        let Some(entry) = self.entries.get_mut(&key) else {
            debug!(event = "core.scheduler.optimistic_unknown_key", key = %key);
            return;
        };
        entry.state.apply_optimistic(payload.clone());
        let fetched_at = entry.state.last_fetched_at;
        entry.broadcast(SourceUpdate::Snapshot {
            payload,
            fetched_at,
            stale: true,
        });
    }

    fn on_revert_optimistic(&mut self, key: SourceKey) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.state.revert_optimistic();
        if let Some(payload) = entry.state.last_result.clone() {
            let fetched_at = entry.state.last_fetched_at;
            let stale = entry.state.stale;
            entry.broadcast(SourceUpdate::Snapshot {
                payload,
                fetched_at,
                stale,
            });
        }
    }

    fn on_timer_fired(&mut self, key: SourceKey, epoch: u64) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        if entry.timer_epoch != epoch {
            return;
        }
        entry.timer_armed = false;
        if entry.subscribers.is_empty() || entry.state.is_in_flight() {
            return;
        }
        self.start_fetch(&key);
    }

    fn on_fetch_settled(
        &mut self,
        key: SourceKey,
        generation: u64,
        outcome: Result<Payload, FetchError>,
        fetched_at: DateTime<Utc>,
    ) {
        let Some(entry) = self.entries.get_mut(&key) else {
            debug!(event = "core.scheduler.fetch_settled_after_retire", key = %key);
            return;
        };

        let follow_up = match entry.state.complete_fetch(generation, outcome, fetched_at) {
            Completion::Applied {
                payload,
                refetch_needed,
            } => {
                let interval = (entry.policy)(&payload);
                entry.state.next_interval = Some(interval);
                debug!(
                    event = "core.scheduler.fetch_applied",
                    key = %key,
                    generation = generation,
                    next_interval_ms = interval.as_millis() as u64,
                );
                entry.broadcast(SourceUpdate::Snapshot {
                    payload,
                    fetched_at: Some(fetched_at),
                    stale: false,
                });
                if refetch_needed {
                    FollowUp::Fetch
                } else {
                    FollowUp::Timer(interval)
                }
            }
            Completion::Failed {
                error,
                refetch_needed,
            } => {
                warn!(
                    event = "core.scheduler.fetch_failed",
                    key = %key,
                    generation = generation,
                    error = %error,
                );
                let last_known = entry.state.last_result.clone();
                // Previous interval stays in effect; the policy is never
                // run on an error payload.
                let interval = entry
                    .state
                    .next_interval
                    .unwrap_or(self.config.retry_interval());
                entry.broadcast(SourceUpdate::FetchFailed { error, last_known });
                if refetch_needed {
                    FollowUp::Fetch
                } else {
                    FollowUp::Timer(interval)
                }
            }
            Completion::DiscardedStale { refetch_needed } => {
                debug!(
                    event = "core.scheduler.fetch_discarded",
                    key = %key,
                    generation = generation,
                );
                if refetch_needed {
                    FollowUp::Fetch
                } else {
                    FollowUp::Nothing
                }
            }
        };

        match follow_up {
            FollowUp::Fetch => self.start_fetch(&key),
            FollowUp::Timer(interval) => self.arm_timer(&key, interval),
            FollowUp::Nothing => {}
        }
    }

    fn start_fetch(&mut self, key: &SourceKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let Some(generation) = entry.state.begin_fetch() else {
            debug!(event = "core.scheduler.fetch_skipped", key = %key);
            return;
        };
        // The timer rearms only after this fetch settles
        entry.timer_epoch += 1;
        entry.timer_armed = false;

        debug!(
            event = "core.scheduler.fetch_started",
            key = %key,
            generation = generation,
        );
        let fut = (entry.fetcher)();
        let tx = self.tx.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let outcome = fut.await;
            let _ = tx.send(SchedulerMsg::FetchSettled {
                key,
                generation,
                outcome,
                fetched_at: Utc::now(),
            });
        });
    }

    fn arm_timer(&mut self, key: &SourceKey, interval: Duration) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.subscribers.is_empty() {
            return;
        }
        entry.timer_epoch += 1;
        entry.timer_armed = true;
        let epoch = entry.timer_epoch;
        let tx = self.tx.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(SchedulerMsg::TimerFired { key, epoch });
        });
    }
}
