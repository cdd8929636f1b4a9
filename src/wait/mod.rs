//! Condition waiting
//!
//! [`Waiter`] blocks until the orchestrator reports an awaited state for an
//! object, a deadline passes, or the caller cancels. Every attempt re-reads
//! the object; a watch stream, when the client offers one, only shortens the
//! pause between attempts.

pub mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::DynamicObject;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;

use crate::client::{ChangeStream, ResourceClient};
use crate::conditions::{ConditionPredicate, condition_is, is_ready};
use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::identity::{ObjectIdentity, identity};

pub use state::{Probe, WaitEvent, WaitState, transition};

/// Per-call wait configuration. Unset fields fall back to the session defaults.
#[derive(Clone, Debug, Default)]
pub struct WaitOptions {
    pub poll_interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Abort the wait as soon as `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// What a single probe saw
pub(crate) enum Observation<T> {
    Done(T),
    /// Still waiting; carries the object state when one was read
    Pending(Option<DynamicObject>),
}

/// Polls objects through a [`ResourceClient`] until a condition holds
#[derive(Clone)]
pub struct Waiter {
    client: Arc<dyn ResourceClient>,
    poll_interval: Duration,
    timeout: Duration,
}

impl Waiter {
    pub fn new(client: Arc<dyn ResourceClient>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            client,
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(client: Arc<dyn ResourceClient>, config: &HarnessConfig) -> Self {
        Self::new(client, config.poll_interval, config.wait_timeout)
    }

    pub fn client(&self) -> &Arc<dyn ResourceClient> {
        &self.client
    }

    /// Block until a get of the object succeeds, returning the object.
    ///
    /// Not-found keeps waiting; any other error is returned immediately.
    pub async fn until_found(&self, obj: &DynamicObject, opts: WaitOptions) -> Result<DynamicObject> {
        let client = self.client.as_ref();
        self.poll(obj, "wait-until-found", &opts, move || async move {
            match client.get(obj).await {
                Ok(found) => Ok(Observation::Done(found)),
                Err(e) if e.is_not_found() => Ok(Observation::Pending(None)),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Block until a get of the object reports not-found
    pub async fn until_not_found(&self, obj: &DynamicObject, opts: WaitOptions) -> Result<()> {
        let client = self.client.as_ref();
        self.poll(obj, "wait-until-not-found", &opts, move || async move {
            match client.get(obj).await {
                Ok(found) => Ok(Observation::Pending(Some(found))),
                Err(e) if e.is_not_found() => Ok(Observation::Done(())),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Block until `predicate` holds for the latest observed object, returning that object.
    ///
    /// An object that is not visible yet counts as pending. Errors from the
    /// client (other than not-found) or from the predicate end the wait.
    pub async fn until_condition<P>(
        &self,
        obj: &DynamicObject,
        predicate: P,
        opts: WaitOptions,
    ) -> Result<DynamicObject>
    where
        P: ConditionPredicate,
    {
        let client = self.client.as_ref();
        let predicate = &predicate;
        self.poll(obj, "wait-until-condition", &opts, move || async move {
            let latest = match client.get(obj).await {
                Ok(latest) => latest,
                Err(e) if e.is_not_found() => return Ok(Observation::Pending(None)),
                Err(e) => return Err(e),
            };
            if predicate.check(&latest)? {
                Ok(Observation::Done(latest))
            } else {
                Ok(Observation::Pending(Some(latest)))
            }
        })
        .await
    }

    /// Block until the condition `type_` reports `status`
    pub async fn until_condition_status(
        &self,
        obj: &DynamicObject,
        type_: &str,
        status: &str,
        opts: WaitOptions,
    ) -> Result<DynamicObject> {
        self.until_condition(obj, condition_is(type_, status), opts)
            .await
    }

    /// Block until the `Ready` condition is `True`
    pub async fn until_ready(&self, obj: &DynamicObject, opts: WaitOptions) -> Result<DynamicObject> {
        self.until_condition(obj, is_ready(), opts).await
    }

    /// Drive `probe` through the wait state machine.
    pub(crate) async fn poll<T, F, Fut>(
        &self,
        obj: &DynamicObject,
        operation: &'static str,
        opts: &WaitOptions,
        mut probe: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>>>,
    {
        let id = identity(obj)?;
        let interval = opts.poll_interval.unwrap_or(self.poll_interval);
        let timeout = opts.timeout.unwrap_or(self.timeout);
        let cancel = opts.cancel.clone().unwrap_or_else(CancellationToken::new);

        let started = Instant::now();
        let deadline = started + timeout;
        let (mut changes, mut interrupted) =
            match self.subscribe(obj, &id, &cancel, deadline).await {
                Ok(changes) => (changes, None),
                Err(interrupt) => (None, Some(interrupt)),
            };
        let mut last_observed: Option<DynamicObject> = None;
        let mut state = WaitState::initial();

        loop {
            // The first probe runs immediately; later ones wait out the poll interval
            let event = if let Some(interrupt) = interrupted.take() {
                interrupt
            } else if state.attempt() == Some(0) {
                self.probe_once(&cancel, deadline, &mut probe, &mut last_observed)
                    .await
            } else {
                match pause(&cancel, &mut changes, interval, deadline).await {
                    Some(interrupt) => interrupt,
                    None => {
                        self.probe_once(&cancel, deadline, &mut probe, &mut last_observed)
                            .await
                    }
                }
            };
            tracing::trace!(identity = %id, operation, %event, "Wait event");

            state = match transition(state, event) {
                WaitState::Succeeded(value) => {
                    tracing::debug!(
                        identity = %id,
                        operation,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Wait succeeded"
                    );
                    return Ok(value);
                }
                WaitState::Failed(err) => return Err(err),
                WaitState::TimedOut => {
                    return Err(timed_out(operation, id, started, last_observed.as_ref()));
                }
                WaitState::Cancelled => {
                    tracing::debug!(identity = %id, operation, "Wait cancelled");
                    return Err(Error::Cancelled {
                        operation,
                        identity: id,
                    });
                }
                polling => {
                    tracing::debug!(identity = %id, operation, state = %polling, "Not there yet");
                    polling
                }
            };
        }
    }

    async fn probe_once<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        probe: &mut F,
        last_observed: &mut Option<DynamicObject>,
    ) -> WaitEvent<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitEvent::CancelRequested,
            outcome = timeout_at(deadline, probe()) => match outcome {
                Err(_) => WaitEvent::DeadlineElapsed,
                Ok(Ok(Observation::Done(value))) => WaitEvent::Observed(Probe::Done(value)),
                Ok(Ok(Observation::Pending(seen))) => {
                    if seen.is_some() {
                        *last_observed = seen;
                    }
                    WaitEvent::Observed(Probe::Pending)
                }
                Ok(Err(err)) => WaitEvent::Observed(Probe::Fatal(err)),
            },
        }
    }

    /// Open the change stream, giving up as soon as the wait is cancelled or out of time
    async fn subscribe<T>(
        &self,
        obj: &DynamicObject,
        id: &ObjectIdentity,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> std::result::Result<Option<ChangeStream>, WaitEvent<T>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WaitEvent::CancelRequested),
            opened = timeout_at(deadline, self.client.watch(obj)) => match opened {
                Err(_) => Err(WaitEvent::DeadlineElapsed),
                Ok(Ok(changes)) => Ok(changes),
                Ok(Err(e)) => {
                    tracing::debug!(identity = %id, error = %e, "Watch unavailable, polling only");
                    Ok(None)
                }
            },
        }
    }
}

/// Sleep until the next attempt is due.
///
/// Returns the interrupting event when cancellation or the deadline ends the
/// wait, `None` when it is time to probe again. A change notification cuts
/// the pause short; a closed change stream falls back to plain polling.
async fn pause<T>(
    cancel: &CancellationToken,
    changes: &mut Option<ChangeStream>,
    interval: Duration,
    deadline: Instant,
) -> Option<WaitEvent<T>> {
    let wake = (Instant::now() + interval).min(deadline);
    let mut stream_closed = false;

    let interrupt = tokio::select! {
        biased;
        _ = cancel.cancelled() => Some(WaitEvent::CancelRequested),
        _ = sleep_until(wake) => (Instant::now() >= deadline).then_some(WaitEvent::DeadlineElapsed),
        change = next_change(changes.as_mut()) => {
            stream_closed = change.is_none();
            None
        }
    };

    if stream_closed {
        *changes = None;
    }
    interrupt
}

async fn next_change(changes: Option<&mut ChangeStream>) -> Option<()> {
    match changes {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn timed_out(
    operation: &'static str,
    identity: ObjectIdentity,
    started: Instant,
    last_observed: Option<&DynamicObject>,
) -> Error {
    let elapsed = started.elapsed();
    tracing::warn!(
        identity = %identity,
        operation,
        elapsed_ms = elapsed.as_millis() as u64,
        "Wait timed out"
    );
    Error::Timeout {
        operation,
        identity,
        elapsed,
        last_observed: last_observed.and_then(|obj| serde_json::to_string_pretty(obj).ok()),
    }
}
