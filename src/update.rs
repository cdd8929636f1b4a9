//! Conflict-safe updates
//!
//! Updates race with the controller writing the same object. [`Updater`]
//! re-reads the object, reapplies the caller's mutation and retries, but only
//! when the API server rejects the write as an optimistic-concurrency
//! conflict. Every other error is returned on the spot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use kube::api::DynamicObject;
use tokio::time::Instant;

use crate::error::Result;
use crate::identity::identity;
use crate::wait::{Observation, WaitOptions, Waiter};

/// Retries updates that lose an optimistic-concurrency race
#[derive(Clone)]
pub struct Updater {
    waiter: Waiter,
    timeout: Duration,
}

impl Updater {
    /// `timeout` bounds the whole retry loop, not a single attempt
    pub fn new(waiter: Waiter, timeout: Duration) -> Self {
        Self { waiter, timeout }
    }

    /// Apply `mutate` to the freshest copy of `obj` and write it back.
    ///
    /// Each attempt waits until the object is visible, runs `mutate` against
    /// the fetched copy and issues a full update. A conflict discards the
    /// attempt and retries after the poll interval; any other failure,
    /// including an error from `mutate`, aborts. Returns the object as stored
    /// by the API server.
    pub async fn update_object<F>(
        &self,
        obj: &DynamicObject,
        mutate: F,
        opts: WaitOptions,
    ) -> Result<DynamicObject>
    where
        F: FnMut(&mut DynamicObject) -> Result<()> + Send,
    {
        let id = identity(obj)?;
        let timeout = opts.timeout.unwrap_or(self.timeout);
        let deadline = Instant::now() + timeout;
        let opts = WaitOptions {
            timeout: Some(timeout),
            ..opts
        };

        let client = self.waiter.client().as_ref();
        let waiter = &self.waiter;
        let mutate = &Mutex::new(mutate);
        let found_opts = &opts;
        let id = &id;
        let attempts = &AtomicU32::new(0);

        self.waiter
            .poll(obj, "update-object", &opts, move || async move {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let remaining = deadline.saturating_duration_since(Instant::now());
                let observed = waiter
                    .until_found(obj, found_opts.clone().with_timeout(remaining))
                    .await?;
                let mut current = observed.clone();

                {
                    let mut mutate = mutate.lock().unwrap_or_else(PoisonError::into_inner);
                    (*mutate)(&mut current)?;
                }

                match client.update(&current).await {
                    Ok(updated) => {
                        tracing::debug!(identity = %id, attempt, "Update applied");
                        Ok(Observation::Done(updated))
                    }
                    Err(e) if e.is_conflict() => {
                        tracing::debug!(identity = %id, attempt, error = %e, "Update conflicted, retrying");
                        Ok(Observation::Pending(Some(observed)))
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }
}
