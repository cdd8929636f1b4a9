//! Status condition queries
//!
//! Conditions live under `status.conditions[]` as `{type, status, ...}`
//! entries written by the controller. A query names exactly one condition
//! type; zero or several entries with that type are a validation error.

use kube::api::DynamicObject;
use serde_json::Value;

use crate::error::{Error, Result};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Object is ready
    pub const READY: &str = "Ready";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Predicate over the latest observed object.
///
/// Returns `Ok(true)` once the awaited state is reached, `Ok(false)` to keep
/// waiting. An error aborts the wait and is never retried.
pub trait ConditionPredicate: Send + Sync {
    fn check(&self, obj: &DynamicObject) -> Result<bool>;
}

impl<F> ConditionPredicate for F
where
    F: Fn(&DynamicObject) -> Result<bool> + Send + Sync,
{
    fn check(&self, obj: &DynamicObject) -> Result<bool> {
        self(obj)
    }
}

fn matching_conditions<'a>(obj: &'a DynamicObject, type_: &str) -> Vec<&'a Value> {
    obj.data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions
                .iter()
                .filter(|c| c.get("type").and_then(Value::as_str) == Some(type_))
                .collect()
        })
        .unwrap_or_default()
}

/// Status string of the single condition with the given type.
///
/// Exactly one condition entry with the type must exist, else this is a
/// [`Error::ValidationError`].
pub fn condition_status(obj: &DynamicObject, type_: &str) -> Result<String> {
    let matches = matching_conditions(obj, type_);
    let [condition] = matches.as_slice() else {
        return Err(Error::validation(format!(
            "found {} matching {type_} conditions, expected 1",
            matches.len()
        )));
    };
    condition
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::validation(format!("condition {type_} has no status")))
}

/// Predicate: the condition `type_` reports `status`.
///
/// A condition that has not been reported yet keeps the wait going; a
/// duplicated condition type fails it immediately since it cannot resolve.
pub fn condition_is(type_: &str, status: &str) -> impl ConditionPredicate + use<> {
    let type_ = type_.to_string();
    let status = status.to_string();
    move |obj: &DynamicObject| -> Result<bool> {
        match matching_conditions(obj, &type_).len() {
            0 => Ok(false),
            _ => Ok(condition_status(obj, &type_)? == status),
        }
    }
}

/// Predicate: `Ready` is `True`
pub fn is_ready() -> impl ConditionPredicate {
    condition_is(condition_types::READY, condition_status::TRUE)
}
