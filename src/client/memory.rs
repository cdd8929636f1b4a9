//! In-memory fake of the resource API for unit tests
//!
//! Behaves like a single API server: resource versions are bumped on every
//! write, stale updates are rejected with a conflict, and `status` is owned by
//! the "controller" (test code via [`InMemoryClient::set_condition`] and
//! [`InMemoryClient::modify`]) so client updates never overwrite it.
//!
//! Every call is recorded, and failures can be injected per verb to exercise
//! the harness error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{DynamicObject, TypeMeta};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::{ChangeStream, ResourceClient, Verb};
use crate::conditions::condition_status;
use crate::error::{Error, Result};
use crate::identity::{ObjectIdentity, Trackable, identity};

/// A recorded client call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub identity: ObjectIdentity,
}

/// Failure to inject into upcoming calls
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    NotFound,
    AlreadyExists,
    Conflict,
    /// HTTP 500 from the API server, classified as unexpected
    ServerError,
}

impl FaultKind {
    fn to_kube_error(self, identity: &ObjectIdentity) -> kube::Error {
        let (code, reason, message) = match self {
            FaultKind::NotFound => (404, "NotFound", format!("{identity} not found")),
            FaultKind::AlreadyExists => (409, "AlreadyExists", format!("{identity} already exists")),
            FaultKind::Conflict => (
                409,
                "Conflict",
                format!(
                    "Operation cannot be fulfilled on {identity}: the object has been modified; \
                     please apply your changes to the latest version and try again"
                ),
            ),
            FaultKind::ServerError => (500, "InternalError", "injected server error".to_string()),
        };
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message,
            reason: reason.to_string(),
            code,
        })
    }
}

fn api_error(verb: Verb, id: &ObjectIdentity, kind: FaultKind) -> Error {
    Error::from_kube(verb, id.clone(), kind.to_kube_error(id))
}

#[derive(Debug)]
struct Fault {
    verb: Verb,
    target: Option<ObjectIdentity>,
    kind: FaultKind,
    remaining: usize,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectIdentity, DynamicObject>,
    resource_version: u64,
    calls: Vec<Call>,
    faults: Vec<Fault>,
    deletion_delay: usize,
    /// Deleted objects still visible for the given number of reads
    terminating: HashMap<ObjectIdentity, usize>,
}

impl FakeState {
    fn record(&mut self, verb: Verb, id: &ObjectIdentity) -> Result<()> {
        self.calls.push(Call {
            verb,
            identity: id.clone(),
        });

        let fault = self.faults.iter_mut().find(|f| {
            f.verb == verb && f.remaining > 0 && f.target.as_ref().is_none_or(|t| t == id)
        });
        let Some(fault) = fault else {
            return Ok(());
        };
        fault.remaining -= 1;
        let kind = fault.kind;
        self.faults.retain(|f| f.remaining > 0);

        tracing::debug!(%verb, identity = %id, ?kind, "Injecting fault");
        Err(api_error(verb, id, kind))
    }

    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// In-process [`ResourceClient`] fake
pub struct InMemoryClient {
    state: Mutex<FakeState>,
    changes: broadcast::Sender<ObjectIdentity>,
    watch_enabled: bool,
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClient {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(FakeState::default()),
            changes,
            watch_enabled: false,
        }
    }

    /// Offer change notifications to waiters instead of pure polling
    pub fn with_watch(mut self) -> Self {
        self.watch_enabled = true;
        self
    }

    /// Keep deleted objects visible for `reads` further gets, like a finalizer would
    pub fn with_deletion_delay(self, reads: usize) -> Self {
        self.state().deletion_delay = reads;
        self
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, id: ObjectIdentity) {
        // No receivers simply means nobody is watching
        let _ = self.changes.send(id);
    }

    /// Fail the next `times` calls of `verb` with `kind`
    pub fn fail_next(&self, verb: Verb, kind: FaultKind, times: usize) {
        self.state().faults.push(Fault {
            verb,
            target: None,
            kind,
            remaining: times,
        });
    }

    /// Fail the next `times` calls of `verb` against one object
    pub fn fail_next_for(&self, verb: Verb, target: ObjectIdentity, kind: FaultKind, times: usize) {
        self.state().faults.push(Fault {
            verb,
            target: Some(target),
            kind,
            remaining: times,
        });
    }

    /// Store an object as if something outside the test had created it
    pub fn seed(&self, obj: DynamicObject) -> Result<DynamicObject> {
        let id = identity(&obj)?;
        let mut stored = obj;
        let mut state = self.state();
        stored.metadata.resource_version = Some(state.next_version());
        stored.metadata.uid = Some(Uuid::new_v4().to_string());
        stored.metadata.generation = Some(1);
        state.objects.insert(id, stored.clone());
        Ok(stored)
    }

    /// Apply a controller-side change (typically to `status`) and bump the resource version
    pub fn modify<F>(&self, id: &ObjectIdentity, f: F) -> Result<DynamicObject>
    where
        F: FnOnce(&mut DynamicObject),
    {
        let updated = {
            let mut state = self.state();
            let version = state.next_version();
            let not_found = api_error(Verb::Update, id, FaultKind::NotFound);
            let obj = state.objects.get_mut(id).ok_or(not_found)?;
            f(obj);
            obj.metadata.resource_version = Some(version);
            obj.clone()
        };
        self.notify(id.clone());
        Ok(updated)
    }

    /// Upsert a status condition the way a controller would report it
    pub fn set_condition(&self, id: &ObjectIdentity, type_: &str, status: &str) -> Result<DynamicObject> {
        self.modify(id, |obj| {
            if !obj.data.is_object() {
                obj.data = json!({});
            }
            let conditions = obj
                .data
                .as_object_mut()
                .map(|data| data.entry("status").or_insert_with(|| json!({})))
                .and_then(|status| {
                    if !status.is_object() {
                        *status = json!({});
                    }
                    status.as_object_mut()
                })
                .map(|status| status.entry("conditions").or_insert_with(|| json!([])));
            let Some(Value::Array(conditions)) = conditions else {
                return;
            };
            match conditions
                .iter_mut()
                .find(|c| c.get("type").and_then(Value::as_str) == Some(type_))
            {
                Some(existing) => existing["status"] = json!(status),
                None => conditions.push(json!({
                    "type": type_,
                    "status": status,
                    "reason": "Reconciled",
                    "message": "",
                })),
            }
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Identities passed to `verb`, in call order
    pub fn calls_for(&self, verb: Verb) -> Vec<ObjectIdentity> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.verb == verb)
            .map(|c| c.identity.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn contains(&self, id: &ObjectIdentity) -> bool {
        self.state().objects.contains_key(id)
    }

    pub fn object(&self, id: &ObjectIdentity) -> Option<DynamicObject> {
        self.state().objects.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Condition lookup on the stored object, for assertions in tests
    pub fn condition(&self, id: &ObjectIdentity, type_: &str) -> Result<String> {
        let obj = self
            .object(id)
            .ok_or_else(|| api_error(Verb::Get, id, FaultKind::NotFound))?;
        condition_status(&obj, type_)
    }
}

/// Everything except `status`, which only the controller writes
fn desired_state(data: &Value) -> Value {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

#[async_trait]
impl ResourceClient for InMemoryClient {
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut created = obj.clone();
        if created.metadata.name.is_none() {
            if let Some(prefix) = &created.metadata.generate_name {
                let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
                created.metadata.name = Some(format!("{prefix}{suffix}"));
            }
        }
        let id = identity(&created)?;

        {
            let mut state = self.state();
            state.record(Verb::Create, &id)?;
            if state.objects.contains_key(&id) {
                return Err(api_error(Verb::Create, &id, FaultKind::AlreadyExists));
            }
            created.metadata.resource_version = Some(state.next_version());
            created.metadata.uid = Some(Uuid::new_v4().to_string());
            created.metadata.generation = Some(1);
            state.objects.insert(id.clone(), created.clone());
        }

        self.notify(id);
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let id = identity(obj)?;

        let updated = {
            let mut state = self.state();
            state.record(Verb::Update, &id)?;
            let version = state.resource_version + 1;
            let conflict = api_error(Verb::Update, &id, FaultKind::Conflict);
            let not_found = api_error(Verb::Update, &id, FaultKind::NotFound);
            let stored = state.objects.get_mut(&id).ok_or(not_found)?;

            if obj.metadata.resource_version.is_some()
                && obj.metadata.resource_version != stored.metadata.resource_version
            {
                return Err(conflict);
            }

            let mut next = obj.clone();
            if let Some(map) = next.data.as_object_mut() {
                match stored.data.get("status") {
                    Some(status) => {
                        map.insert("status".to_string(), status.clone());
                    }
                    None => {
                        map.remove("status");
                    }
                }
            }
            let generation = stored.metadata.generation.unwrap_or(1);
            next.metadata.generation = if desired_state(&next.data) != desired_state(&stored.data) {
                Some(generation + 1)
            } else {
                Some(generation)
            };
            next.metadata.uid = stored.metadata.uid.clone();
            next.metadata.resource_version = Some(version.to_string());
            *stored = next.clone();
            state.resource_version = version;
            next
        };

        self.notify(id);
        Ok(updated)
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        let id = identity(obj)?;

        {
            let mut state = self.state();
            state.record(Verb::Delete, &id)?;
            if !state.objects.contains_key(&id) {
                return Err(api_error(Verb::Delete, &id, FaultKind::NotFound));
            }
            if state.terminating.contains_key(&id) {
                return Ok(());
            }
            if state.deletion_delay > 0 {
                let delay = state.deletion_delay;
                state.terminating.insert(id.clone(), delay);
            } else {
                state.objects.remove(&id);
            }
        }

        self.notify(id);
        Ok(())
    }

    async fn get(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let id = identity(obj)?;

        let (found, removed) = {
            let mut state = self.state();
            state.record(Verb::Get, &id)?;
            let Some(found) = state.objects.get(&id).cloned() else {
                return Err(api_error(Verb::Get, &id, FaultKind::NotFound));
            };
            let mut removed = false;
            if let Some(remaining) = state.terminating.get_mut(&id) {
                if *remaining <= 1 {
                    state.terminating.remove(&id);
                    state.objects.remove(&id);
                    removed = true;
                } else {
                    *remaining -= 1;
                }
            }
            (found, removed)
        };

        if removed {
            self.notify(id);
        }
        Ok(found)
    }

    async fn list(&self, types: &TypeMeta, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        let scope = ObjectIdentity::new(types.kind.as_str(), namespace, "*");
        let mut state = self.state();
        state.record(Verb::List, &scope)?;
        Ok(state
            .objects
            .values()
            .filter(|obj| {
                obj.types.as_ref() == Some(types)
                    && namespace.is_none_or(|ns| obj.namespace() == Some(ns))
            })
            .cloned()
            .collect())
    }

    async fn watch(&self, obj: &DynamicObject) -> Result<Option<ChangeStream>> {
        if !self.watch_enabled {
            return Ok(None);
        }
        let target = identity(obj)?;
        self.state().record(Verb::Watch, &target)?;

        let rx = self.changes.subscribe();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let target = target.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(id) if id == target => return Some(((), rx)),
                        Ok(_) => continue,
                        // Missed notifications still mean "something changed"
                        Err(RecvError::Lagged(_)) => return Some(((), rx)),
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed();
        Ok(Some(stream))
    }
}
