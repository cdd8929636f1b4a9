//! Object identity resolution
//!
//! Every object the harness touches is keyed by its [`ObjectIdentity`]
//! (kind + namespace + name). Objects expose the metadata through the
//! [`Trackable`] capability trait rather than runtime introspection.

use std::fmt;

use kube::Resource;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stable, comparable key for a tracked object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub kind: String,
    /// `None` for cluster-scoped objects
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectIdentity {
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Capability every trackable object implements
pub trait Trackable {
    fn kind(&self) -> Option<&str>;
    fn namespace(&self) -> Option<&str>;
    fn name(&self) -> Option<&str>;
}

impl Trackable for DynamicObject {
    fn kind(&self) -> Option<&str> {
        self.types.as_ref().map(|t| t.kind.as_str())
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }
}

/// Resolve the identity of an object.
///
/// Fails with [`Error::MissingMetadata`] when the kind or name is absent or
/// empty. A missing namespace is not an error: it marks a cluster-scoped
/// object.
pub fn identity<T: Trackable + ?Sized>(obj: &T) -> Result<ObjectIdentity> {
    let kind = obj
        .kind()
        .filter(|k| !k.is_empty())
        .ok_or(Error::MissingMetadata("kind"))?;
    let name = obj
        .name()
        .filter(|n| !n.is_empty())
        .ok_or(Error::MissingMetadata("metadata.name"))?;
    let namespace = obj.namespace().filter(|ns| !ns.is_empty());

    Ok(ObjectIdentity::new(kind, namespace, name))
}

/// Best-effort identity for error context, tolerant of missing metadata
pub(crate) fn describe(obj: &DynamicObject) -> ObjectIdentity {
    let kind = obj.kind().unwrap_or("<unknown>");
    let name = match (obj.name(), obj.metadata.generate_name.as_deref()) {
        (Some(name), _) => name.to_string(),
        (None, Some(prefix)) => format!("{prefix}*"),
        (None, None) => "<unnamed>".to_string(),
    };
    ObjectIdentity::new(kind, obj.namespace(), name)
}

/// Convert a typed resource into the dynamic representation the harness works with
pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(obj)?;
    // k8s-openapi types serialize apiVersion/kind themselves; custom resources may not
    if let Some(map) = value.as_object_mut() {
        map.entry("apiVersion")
            .or_insert_with(|| K::api_version(&()).into_owned().into());
        map.entry("kind")
            .or_insert_with(|| K::kind(&()).into_owned().into());
    }
    Ok(serde_json::from_value(value)?)
}

/// Convert a dynamic object back into a typed resource
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
