//! Mutation-triggered cache invalidation.
//!
//! A mutation runs its request, and only on success marks the sources named
//! by its `MutationSpec` stale. Subscribed sources re-fetch out of band;
//! idle ones re-fetch on their next subscription. Failures leave every cache
//! untouched so the UI keeps showing confirmed data.

use std::fmt::Display;
use std::future::Future;

use tracing::{debug, info, warn};

use crate::mutation::types::MutationSpec;
use crate::scheduler::{Payload, Scheduler, SourceKey};

#[derive(Clone)]
pub struct MutationRunner {
    scheduler: Scheduler,
}

impl MutationRunner {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Run a mutation and invalidate its footprint if it succeeds.
    pub async fn run<T, E, Fut>(&self, spec: &MutationSpec, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        debug!(event = "core.mutation.started", name = spec.name);
        match fut.await {
            Ok(value) => {
                self.invalidate_footprint(spec);
                info!(
                    event = "core.mutation.completed",
                    name = spec.name,
                    keys = spec.keys.len(),
                    prefixes = spec.prefixes.len(),
                );
                Ok(value)
            }
            Err(error) => {
                warn!(
                    event = "core.mutation.failed",
                    name = spec.name,
                    error = %error,
                );
                Err(error)
            }
        }
    }

    /// Like `run`, but overlays `payload` on `key` before the request so the
    /// UI reflects the change immediately. On failure the overlay is rolled
    /// back to the last confirmed payload.
    pub async fn run_optimistic<T, E, Fut>(
        &self,
        spec: &MutationSpec,
        key: SourceKey,
        payload: Payload,
        fut: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.scheduler.apply_optimistic(key.clone(), payload);
        match self.run(spec, fut).await {
            Ok(value) => Ok(value),
            Err(error) => {
                debug!(
                    event = "core.mutation.optimistic_reverted",
                    name = spec.name,
                    key = %key,
                );
                self.scheduler.revert_optimistic(key);
                Err(error)
            }
        }
    }

    fn invalidate_footprint(&self, spec: &MutationSpec) {
        for key in &spec.keys {
            self.scheduler.invalidate(key.clone());
        }
        for prefix in &spec.prefixes {
            self.scheduler.invalidate_prefix(prefix.clone());
        }
    }
}
