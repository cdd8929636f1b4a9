//! Resource-API client abstraction
//!
//! The harness talks to the orchestrator exclusively through
//! [`ResourceClient`]. [`KubeClient`] drives a real cluster; [`InMemoryClient`]
//! is an in-process fake for unit tests.

mod kube_client;
mod memory;

pub use kube_client::KubeClient;
pub use memory::{Call, FaultKind, InMemoryClient};

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::api::{DynamicObject, TypeMeta};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Client operations, used for error context and call recording
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Create,
    Update,
    Delete,
    Get,
    List,
    Watch,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Create => write!(f, "create"),
            Verb::Update => write!(f, "update"),
            Verb::Delete => write!(f, "delete"),
            Verb::Get => write!(f, "get"),
            Verb::List => write!(f, "list"),
            Verb::Watch => write!(f, "watch"),
        }
    }
}

/// Stream of change notifications for a single object.
///
/// Items carry no payload: waiters always re-read the object after a
/// notification instead of trusting the event contents.
pub type ChangeStream = BoxStream<'static, ()>;

/// The resource API the harness is built on.
///
/// Implementations must classify API failures into the harness error kinds
/// (see [`crate::Error::from_kube`]) so callers can tell not-found, already
/// exists and optimistic-concurrency conflicts apart from everything else.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Full replace of the object. A stale `metadata.resourceVersion` yields a conflict.
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn delete(&self, obj: &DynamicObject) -> Result<()>;

    /// Fetch the latest state of the object identified by `obj`
    async fn get(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn list(&self, types: &TypeMeta, namespace: Option<&str>) -> Result<Vec<DynamicObject>>;

    /// Change notifications for `obj`, when the backend supports watching.
    ///
    /// `None` means the caller must fall back to polling.
    async fn watch(&self, _obj: &DynamicObject) -> Result<Option<ChangeStream>> {
        Ok(None)
    }
}
