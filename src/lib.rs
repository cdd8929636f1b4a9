//! Reconciliation-aware test client for Kubernetes integration tests.
//!
//! Tests create objects through a [`LifecycleTracker`], block on the status a
//! controller reports with a [`Waiter`], and get every object removed in
//! reverse creation order when the test ends.
//!
//! ```rust,ignore
//! let client = Arc::new(KubeClient::try_default().await?);
//! let tracker = LifecycleTracker::new(client, HarnessConfig::from_env()?, SessionLogger::current());
//!
//! tracker
//!     .scope(async {
//!         let ns = TestNamespace::create(&tracker, "widgets").await?;
//!         let widget = tracker.create(&ns.scoped(widget("w1")?)).await?;
//!         tracker.waiter().until_ready(&widget, WaitOptions::new()).await?;
//!         Ok(())
//!     })
//!     .await?;
//! ```

pub mod cleanup;
pub mod client;
pub mod conditions;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod namespace;
pub mod tracker;
pub mod update;
pub mod wait;

pub use cleanup::{CleanupReport, CleanupStrategy, TestOutcome};
pub use client::{Call, ChangeStream, FaultKind, InMemoryClient, KubeClient, ResourceClient, Verb};
pub use conditions::{ConditionPredicate, condition_is, condition_status, is_ready};
pub use config::HarnessConfig;
pub use error::{CleanupFailure, Error, ErrorKind, Result};
pub use identity::{ObjectIdentity, Trackable, from_dynamic, identity, to_dynamic};
pub use logging::{SessionLogger, init_test_logging, log_object};
pub use namespace::TestNamespace;
pub use tracker::LifecycleTracker;
pub use update::Updater;
pub use wait::{WaitOptions, WaitState, Waiter};
