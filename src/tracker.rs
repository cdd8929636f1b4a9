//! Lifecycle tracking and cleanup
//!
//! [`LifecycleTracker`] wraps a [`ResourceClient`] and remembers every object
//! a test creates so it can be removed afterwards, newest first. Registration
//! happens as soon as a create succeeds, so a test that fails halfway still
//! leaves nothing behind.
//!
//! The bookkeeping lives behind a single mutex that is never held across a
//! client call.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use kube::api::{DynamicObject, TypeMeta};

use crate::cleanup::{CleanupReport, TestOutcome};
use crate::client::ResourceClient;
use crate::config::HarnessConfig;
use crate::error::{CleanupFailure, Error, Result};
use crate::identity::{ObjectIdentity, describe, identity};
use crate::logging::{SessionLogger, log_object};
use crate::update::Updater;
use crate::wait::{WaitOptions, Waiter};

/// Tracked objects keyed by identity, plus the order they were registered in.
///
/// Every identity in `order` is a key of `entries` and vice versa.
#[derive(Debug, Default)]
struct TrackedObjects {
    entries: HashMap<ObjectIdentity, DynamicObject>,
    order: Vec<ObjectIdentity>,
}

impl TrackedObjects {
    /// Re-registering replaces the stored object but keeps its original position
    fn register(&mut self, id: ObjectIdentity, obj: DynamicObject) {
        if self.entries.insert(id.clone(), obj).is_none() {
            self.order.push(id);
        }
    }

    fn unregister(&mut self, id: &ObjectIdentity) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            self.order.retain(|tracked| tracked != id);
        }
        removed
    }

    /// Objects still tracked, newest first
    fn reverse_snapshot(&self) -> Vec<(ObjectIdentity, DynamicObject)> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.entries.get(id).map(|obj| (id.clone(), obj.clone())))
            .collect()
    }
}

/// Creates, tracks and cleans up the objects of a single test
pub struct LifecycleTracker {
    client: Arc<dyn ResourceClient>,
    waiter: Waiter,
    updater: Updater,
    config: HarnessConfig,
    logger: SessionLogger,
    tracked: Mutex<TrackedObjects>,
}

impl LifecycleTracker {
    pub fn new(client: Arc<dyn ResourceClient>, config: HarnessConfig, logger: SessionLogger) -> Self {
        let waiter = Waiter::from_config(client.clone(), &config);
        let updater = Updater::new(waiter.clone(), config.update_timeout);
        Self {
            client,
            waiter,
            updater,
            config,
            logger,
            tracked: Mutex::new(TrackedObjects::default()),
        }
    }

    /// Default configuration, logging through the active dispatcher
    pub fn with_defaults(client: Arc<dyn ResourceClient>) -> Self {
        Self::new(client, HarnessConfig::default(), SessionLogger::current())
    }

    pub fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn tracked_objects(&self) -> MutexGuard<'_, TrackedObjects> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identities awaiting cleanup, in registration order
    pub fn tracked(&self) -> Vec<ObjectIdentity> {
        self.tracked_objects().order.clone()
    }

    /// Create `obj` and register the stored copy for cleanup
    pub async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        self.logger
            .scope(async {
                let created = self.client.create(obj).await?;
                self.register_for_cleanup(&created)?;
                tracing::info!(identity = %describe(&created), "Created");
                log_object("Created object", &created);
                Ok(created)
            })
            .await
    }

    /// Create `obj`, or overwrite the existing object with it when the name is taken.
    ///
    /// Either way the object ends up registered for cleanup.
    pub async fn ensure_created(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        self.logger
            .scope(async {
                match self.client.create(obj).await {
                    Ok(created) => {
                        self.register_for_cleanup(&created)?;
                        tracing::info!(identity = %describe(&created), "Created");
                        Ok(created)
                    }
                    Err(e) if e.is_already_exists() => {
                        let id = identity(obj)?;
                        tracing::info!(identity = %id, "Already exists, updating instead");
                        self.register_for_cleanup(obj)?;
                        let updated = self
                            .updater
                            .update_object(obj, replace_with(obj), WaitOptions::new())
                            .await?;
                        self.register_for_cleanup(&updated)?;
                        Ok(updated)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Unregister `obj`, then delete it. Deleting an object that is already gone succeeds.
    pub async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        self.logger
            .scope(async {
                let id = identity(obj)?;
                self.tracked_objects().unregister(&id);
                match self.client.delete(obj).await {
                    Ok(()) => {
                        tracing::info!(identity = %id, "Deleted");
                        Ok(())
                    }
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(identity = %id, "Already deleted");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// [`LifecycleTracker::delete`], then block until the object is gone
    pub async fn delete_and_wait(&self, obj: &DynamicObject, opts: WaitOptions) -> Result<()> {
        self.delete(obj).await?;
        self.logger
            .scope(self.waiter.until_not_found(obj, opts))
            .await
    }

    pub async fn get(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        self.logger.scope(self.client.get(obj)).await
    }

    pub async fn list(&self, types: &TypeMeta, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        self.logger.scope(self.client.list(types, namespace)).await
    }

    /// Single update attempt; a conflict is returned to the caller
    pub async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        self.logger.scope(self.client.update(obj)).await
    }

    /// Conflict-safe update, see [`Updater::update_object`]
    pub async fn update_object<F>(
        &self,
        obj: &DynamicObject,
        mutate: F,
        opts: WaitOptions,
    ) -> Result<DynamicObject>
    where
        F: FnMut(&mut DynamicObject) -> Result<()> + Send,
    {
        self.logger
            .scope(self.updater.update_object(obj, mutate, opts))
            .await
    }

    /// Track `obj` for cleanup without creating it
    pub fn register_for_cleanup(&self, obj: &DynamicObject) -> Result<()> {
        let id = identity(obj)?;
        self.tracked_objects().register(id.clone(), obj.clone());
        self.logger
            .in_scope(|| tracing::debug!(identity = %id, "Registered for cleanup"));
        Ok(())
    }

    /// Stop tracking `obj`. Unknown objects are ignored.
    pub fn unregister_for_cleanup(&self, obj: &DynamicObject) -> Result<()> {
        let id = identity(obj)?;
        if self.tracked_objects().unregister(&id) {
            self.logger
                .in_scope(|| tracing::debug!(identity = %id, "Unregistered from cleanup"));
        }
        Ok(())
    }

    /// Delete every tracked object, newest first, if the cleanup strategy
    /// allows it for `outcome`.
    ///
    /// Each object is deleted and then awaited until the API reports it gone.
    /// A failure does not stop the walk; all failures are returned together
    /// once every object has been attempted.
    pub async fn cleanup(&self, outcome: TestOutcome) -> Result<CleanupReport> {
        self.logger.scope(self.run_cleanup(outcome)).await
    }

    async fn run_cleanup(&self, outcome: TestOutcome) -> Result<CleanupReport> {
        let strategy = self.config.cleanup_strategy;
        if !strategy.should_run(outcome) {
            let left = self.tracked();
            tracing::info!(%strategy, %outcome, remaining = left.len(), "Skipping cleanup");
            for id in &left {
                tracing::info!(identity = %id, "Leaving object in place");
            }
            return Ok(CleanupReport::skipped());
        }

        let pending = self.tracked_objects().reverse_snapshot();
        tracing::info!(%strategy, %outcome, objects = pending.len(), "Cleaning up");

        let mut report = CleanupReport {
            ran: true,
            deleted: Vec::with_capacity(pending.len()),
        };
        let mut failures = Vec::new();

        for (id, obj) in pending {
            match self.remove(&obj).await {
                Ok(()) => {
                    self.tracked_objects().unregister(&id);
                    tracing::debug!(identity = %id, "Cleaned up");
                    report.deleted.push(id);
                }
                Err(error) => {
                    tracing::warn!(identity = %id, error = %error, "Cleanup failed");
                    failures.push(CleanupFailure {
                        identity: id,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(Error::CleanupFailed(failures))
        }
    }

    async fn remove(&self, obj: &DynamicObject) -> Result<()> {
        match self.client.delete(obj).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let opts = WaitOptions::new().with_timeout(self.config.cleanup_timeout);
        self.waiter.until_not_found(obj, opts).await
    }

    /// Run a test body, then clean up according to its outcome.
    ///
    /// An `Err` or a panic from `body` counts as a failed test. The body's
    /// error wins over a cleanup error; a panic is resumed after cleanup.
    pub async fn scope<T, F>(&self, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = AssertUnwindSafe(self.logger.scope(body))
            .catch_unwind()
            .await;

        let outcome = match &result {
            Ok(Ok(_)) => TestOutcome::Passed,
            _ => TestOutcome::Failed,
        };
        let cleanup = self.cleanup(outcome).await;

        match result {
            Ok(Ok(value)) => cleanup.map(|_| value),
            Ok(Err(e)) => {
                if let Err(cleanup_err) = cleanup {
                    self.logger
                        .in_scope(|| tracing::error!(error = %cleanup_err, "Cleanup after failed test"));
                }
                Err(e)
            }
            Err(panic) => {
                if let Err(cleanup_err) = cleanup {
                    self.logger
                        .in_scope(|| tracing::error!(error = %cleanup_err, "Cleanup after panicked test"));
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

/// Mutation that turns the live object into `desired`, keeping the live
/// resource version so the update is not rejected as stale.
fn replace_with(desired: &DynamicObject) -> impl FnMut(&mut DynamicObject) -> Result<()> + Send + use<> {
    let desired = desired.clone();
    move |live: &mut DynamicObject| {
        let resource_version = live.metadata.resource_version.take();
        *live = desired.clone();
        live.metadata.resource_version = resource_version;
        Ok(())
    }
}
