//! otelsync kubehub: API-server backed collector store and parent lookup

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, DeleteParams, PostParams, Preconditions},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{ApiCapabilities, Discovery, Scope},
    Client, ResourceExt,
};
use otelsync_collector::{object_key, OpenTelemetryCollector};
use otelsync_store::{CollectorStore, StoreError};
use tracing::{debug, info};

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

/// Collector store talking to the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, namespace: &str) -> Api<OpenTelemetryCollector> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for(&self, obj: &OpenTelemetryCollector) -> Result<Api<OpenTelemetryCollector>, StoreError> {
        let ns = obj
            .namespace()
            .ok_or_else(|| StoreError::Backend(format!("{}: namespace required", obj.name_any()).into()))?;
        Ok(self.api(&ns))
    }
}

/// Map an API error onto the store taxonomy. `sent` is the resourceVersion
/// the failed write carried, if any.
pub fn store_error(err: kube::Error, key: String, sent: Option<String>) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(key),
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => StoreError::AlreadyExists(key),
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict { key, sent, stored: None },
        other => StoreError::Backend(Box::new(other)),
    }
}

#[async_trait::async_trait]
impl CollectorStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<OpenTelemetryCollector>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| store_error(e, format!("{}/{}", namespace, name), None))
    }

    async fn create(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> {
        let api = self.api_for(obj)?;
        let created = api
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| store_error(e, object_key(obj), None))?;
        debug!(key = %object_key(obj), rv = ?created.metadata.resource_version, "collector created");
        Ok(())
    }

    async fn update(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> {
        let api = self.api_for(obj)?;
        let replaced = api
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(|e| store_error(e, object_key(obj), obj.resource_version()))?;
        debug!(key = %object_key(obj), rv = ?replaced.metadata.resource_version, "collector replaced");
        Ok(())
    }

    async fn delete(&self, obj: &OpenTelemetryCollector) -> Result<(), StoreError> {
        let api = self.api_for(obj)?;
        // Pin the uid so a recreated object with the same name is left alone.
        let dp = DeleteParams {
            preconditions: obj.uid().map(|uid| Preconditions { uid: Some(uid), resource_version: None }),
            ..DeleteParams::default()
        };
        api.delete(&obj.name_any(), &dp)
            .await
            .map_err(|e| store_error(e, object_key(obj), None))?;
        Ok(())
    }
}

// ---- parent lookup ----

/// A parent object fetched through discovery, with the API resource needed
/// to build owner references for it.
#[derive(Debug, Clone)]
pub struct ParentObject {
    pub object: DynamicObject,
    pub resource: ApiResource,
}

/// Parse a parent kind given as `v1/Kind` (core group) or `group/version/Kind`.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let mut parts = key.rsplitn(3, '/');
    let kind = parts.next().filter(|s| !s.is_empty());
    let version = parts.next().filter(|s| !s.is_empty());
    let group = parts.next().unwrap_or_default();
    match (kind, version) {
        (Some(kind), Some(version)) if !group.contains('/') => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(anyhow!("invalid parent kind {:?}: expected v1/Kind or group/version/Kind", key)),
    }
}

/// Resolve `gvk` by discovering its own API group only.
async fn resolve_parent_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities)> {
    let discovery = Discovery::new(client)
        .filter(&[gvk.group.as_str()])
        .run()
        .await
        .with_context(|| format!("discovering API group {:?}", gvk.group))?;
    discovery
        .resolve_gvk(gvk)
        .ok_or_else(|| anyhow!("parent kind {}/{} {} is not served by the cluster", gvk.group, gvk.version, gvk.kind))
}

/// Fetch the parent object identified by a GVK key (e.g. `serving.kserve.io/v1beta1/InferenceService`).
pub async fn fetch_parent(client: Client, gvk_key: &str, namespace: &str, name: &str) -> Result<ParentObject> {
    let gvk = parse_gvk_key(gvk_key)?;
    let (ar, caps) = resolve_parent_resource(client.clone(), &gvk).await?;
    debug!(group = %ar.group, version = %ar.version, plural = %ar.plural, "parent kind resolved");
    let api: Api<DynamicObject> = match caps.scope {
        Scope::Namespaced => Api::namespaced_with(client, namespace, &ar),
        Scope::Cluster => Api::all_with(client, &ar),
    };
    let object = api
        .get(name)
        .await
        .with_context(|| format!("fetching parent {} {}/{}", gvk_key, namespace, name))?;
    info!(gvk = %gvk_key, ns = %namespace, name = %name, "parent fetched");
    Ok(ParentObject { object, resource: ar })
}
