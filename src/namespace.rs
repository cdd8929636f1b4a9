//! Per-test namespaces for isolation

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DynamicObject, ObjectMeta};
use uuid::Uuid;

use crate::error::Result;
use crate::identity::to_dynamic;
use crate::tracker::LifecycleTracker;

/// Label set on every namespace created by the harness
pub const TEST_NAMESPACE_LABEL: &str = "reconcile-harness.test";

/// Label carrying the prefix the namespace was created with
pub const TEST_PREFIX_LABEL: &str = "test-prefix";

/// A namespace owned by one test.
///
/// Created through the tracker, so it is registered before anything the test
/// puts in it and therefore deleted after all of it.
#[derive(Clone, Debug)]
pub struct TestNamespace {
    name: String,
    object: DynamicObject,
}

impl TestNamespace {
    /// Create a namespace named `{prefix}-{8 hex chars}`
    pub async fn create(tracker: &LifecycleTracker, prefix: &str) -> Result<Self> {
        let name = unique_name(prefix);
        let labels = BTreeMap::from([
            (TEST_NAMESPACE_LABEL.to_string(), "true".to_string()),
            (TEST_PREFIX_LABEL.to_string(), prefix.to_string()),
        ]);
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };

        let object = tracker.create(&to_dynamic(&ns)?).await?;
        tracing::info!(namespace = %name, "Created test namespace");

        Ok(Self { name, object })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace as stored by the API server
    pub fn object(&self) -> &DynamicObject {
        &self.object
    }

    /// Place `obj` in this namespace
    pub fn scoped(&self, mut obj: DynamicObject) -> DynamicObject {
        obj.metadata.namespace = Some(self.name.clone());
        obj
    }
}

fn unique_name(prefix: &str) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{prefix}-{suffix}")
}
