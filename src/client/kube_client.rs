//! [`ResourceClient`] backed by a live Kubernetes API server

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams, TypeMeta};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::Client;
use kube::runtime::{WatchStreamExt, watcher};

use super::{ChangeStream, ResourceClient, Verb};
use crate::error::{Error, Result};
use crate::identity::{ObjectIdentity, describe};

/// Dynamic client that resolves each apiVersion/kind through discovery.
///
/// Discovery results are cached for the lifetime of the client, so only the
/// first request per kind pays for the lookup.
pub struct KubeClient {
    client: Client,
    resources: Mutex<HashMap<(String, String), (ApiResource, ApiCapabilities)>>,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Connect using the inferred kubeconfig / in-cluster configuration
    pub async fn try_default() -> Result<Self, kube::Error> {
        Ok(Self::new(Client::try_default().await?))
    }

    async fn resolve(
        &self,
        verb: Verb,
        types: &TypeMeta,
        context: &ObjectIdentity,
    ) -> Result<(ApiResource, ApiCapabilities)> {
        let key = (types.api_version.clone(), types.kind.clone());
        let cached = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(found) = cached {
            return Ok(found);
        }

        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", types.api_version.as_str()),
        };
        let gvk = GroupVersionKind::gvk(group, version, &types.kind);
        let resolved = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|source| Error::KubeError {
                verb,
                identity: context.clone(),
                source,
            })?;

        tracing::debug!(
            api_version = %types.api_version,
            kind = %types.kind,
            plural = %resolved.0.plural,
            "Resolved API resource"
        );

        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn api_for(
        &self,
        verb: Verb,
        types: &TypeMeta,
        namespace: Option<&str>,
        context: &ObjectIdentity,
    ) -> Result<Api<DynamicObject>> {
        let (resource, caps) = self.resolve(verb, types, context).await?;
        let api = match caps.scope {
            Scope::Namespaced => {
                let ns = namespace.unwrap_or(self.client.default_namespace());
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api)
    }

    async fn object_api(&self, verb: Verb, obj: &DynamicObject) -> Result<Api<DynamicObject>> {
        let context = describe(obj);
        let types = obj.types.as_ref().ok_or(Error::MissingMetadata("kind"))?;
        self.api_for(verb, types, obj.metadata.namespace.as_deref(), &context)
            .await
    }
}

fn object_name(obj: &DynamicObject) -> Result<&str> {
    obj.metadata
        .name
        .as_deref()
        .ok_or(Error::MissingMetadata("metadata.name"))
}

#[async_trait]
impl ResourceClient for KubeClient {
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let api = self.object_api(Verb::Create, obj).await?;
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(Verb::Create, describe(obj), e))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let api = self.object_api(Verb::Update, obj).await?;
        api.replace(object_name(obj)?, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(Verb::Update, describe(obj), e))
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        let api = self.object_api(Verb::Delete, obj).await?;
        api.delete(object_name(obj)?, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(Verb::Delete, describe(obj), e))
    }

    async fn get(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let api = self.object_api(Verb::Get, obj).await?;
        api.get(object_name(obj)?)
            .await
            .map_err(|e| Error::from_kube(Verb::Get, describe(obj), e))
    }

    async fn list(&self, types: &TypeMeta, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        let context = ObjectIdentity::new(types.kind.as_str(), namespace, "*");
        let api = match namespace {
            Some(_) => self.api_for(Verb::List, types, namespace, &context).await?,
            None => {
                let (resource, _) = self.resolve(Verb::List, types, &context).await?;
                Api::all_with(self.client.clone(), &resource)
            }
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube(Verb::List, context, e))?;
        Ok(list.items)
    }

    async fn watch(&self, obj: &DynamicObject) -> Result<Option<ChangeStream>> {
        let api = self.object_api(Verb::Watch, obj).await?;
        let selector = format!("metadata.name={}", object_name(obj)?);
        let stream = watcher(api, watcher::Config::default().fields(&selector))
            .default_backoff()
            .filter_map(|event| async move {
                match event {
                    Ok(_) => Some(()),
                    Err(e) => {
                        tracing::debug!(error = %e, "Watch error, falling back to next poll");
                        None
                    }
                }
            })
            .boxed();
        Ok(Some(stream))
    }
}
