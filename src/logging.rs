//! Session-scoped logging
//!
//! A [`SessionLogger`] carries its own `tracing` dispatcher and a session
//! span, so harness output can be routed per test session without installing
//! a global subscriber.

use std::future::Future;

use kube::api::DynamicObject;
use tracing::instrument::{Instrumented, WithDispatch, WithSubscriber};
use tracing::{Dispatch, Instrument, Span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::identity::describe;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_TEST_FILTER: &str = "info,kube=warn";

/// Logger handed to the harness at construction
#[derive(Clone, Debug)]
pub struct SessionLogger {
    dispatch: Dispatch,
    span: Span,
    session_id: Uuid,
}

impl SessionLogger {
    /// Wrap `dispatch`, opening a new session span on it
    pub fn new(dispatch: Dispatch) -> Self {
        let session_id = Uuid::new_v4();
        let span = tracing::dispatcher::with_default(&dispatch, || {
            tracing::info_span!("harness_session", session_id = %session_id)
        });
        Self {
            dispatch,
            span,
            session_id,
        }
    }

    /// Use whichever dispatcher is active for the calling thread
    pub fn current() -> Self {
        Self::new(tracing::dispatcher::get_default(Dispatch::clone))
    }

    /// Formatted output through the libtest capture writer, filtered by `filter`
    pub fn for_tests(filter: &str) -> Self {
        let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();
        Self::new(Dispatch::new(subscriber))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run `fut` inside the session span, logging through this session's dispatcher
    pub fn scope<F: Future>(&self, fut: F) -> WithDispatch<Instrumented<F>> {
        fut.instrument(self.span.clone())
            .with_subscriber(self.dispatch.clone())
    }

    /// Synchronous counterpart of [`SessionLogger::scope`]
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, || self.span.in_scope(f))
    }
}

impl Default for SessionLogger {
    fn default() -> Self {
        Self::current()
    }
}

/// Install a global test-writer subscriber. Safe to call from every test.
pub fn init_test_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Dump an object as pretty JSON at debug level
pub fn log_object(label: &str, obj: &DynamicObject) {
    let id = describe(obj);
    match serde_json::to_string_pretty(obj) {
        Ok(json) => tracing::debug!(identity = %id, "{label}:\n{json}"),
        Err(e) => tracing::debug!(identity = %id, error = %e, "{label}: not serializable"),
    }
}
