//! `ResourceStore` over `kube::Api<DynamicObject>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use conflux_core::error::StoreError;
use conflux_core::meta::{ObjectExt, TypedRef};
use conflux_core::Document;
use conflux_store::ResourceStore;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, info};

pub const FIELD_MANAGER: &str = "conflux";

/// `v1/Kind` or `group/version/Kind` into `(apiVersion, kind)`.
pub fn parse_kind_key(key: &str) -> Result<(String, String)> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok((version.to_string(), kind.to_string())),
        [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => {
            Ok((format!("{}/{}", group, version), kind.to_string()))
        }
        _ => Err(anyhow!("invalid kind key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

type Resolved = (ApiResource, bool);

pub struct KubeStore {
    client: Client,
    /// `(apiVersion, kind)` to the served resource and whether it is namespaced.
    discovery: ArcSwap<FxHashMap<(String, String), Resolved>>,
}

pub(crate) fn map_kube_error(what: &str, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) => match ae.code {
            404 => StoreError::NotFound(what.to_string()),
            409 if ae.reason == "AlreadyExists" => StoreError::AlreadyExists(what.to_string()),
            409 => StoreError::Conflict(format!("{}: {}", what, ae.message)),
            400 | 422 => StoreError::Invalid(format!("{}: {}", what, ae.message)),
            _ => StoreError::Other(format!("{}: {} ({})", what, ae.message, ae.code)),
        },
        other => StoreError::Other(format!("{}: {}", what, other)),
    }
}

fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
    }
}

/// List items come back without type fields; put them back.
fn to_document(obj: DynamicObject, ar: &ApiResource) -> Result<Document, StoreError> {
    let mut v = serde_json::to_value(obj).map_err(|e| StoreError::Other(format!("cannot serialize object: {}", e)))?;
    strip_managed_fields(&mut v);
    if let Some(map) = v.as_object_mut() {
        map.insert("apiVersion".into(), Value::String(ar.api_version.clone()));
        map.insert("kind".into(), Value::String(ar.kind.clone()));
    }
    Ok(v)
}

fn to_dynamic(doc: &Document) -> Result<DynamicObject, StoreError> {
    let mut v = doc.clone();
    strip_managed_fields(&mut v);
    serde_json::from_value(v).map_err(|e| StoreError::Invalid(format!("{} {}: {}", doc.kind(), doc.name(), e)))
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, discovery: ArcSwap::from_pointee(FxHashMap::default()) }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Re-run discovery and swap in the new table.
    pub async fn refresh_discovery(&self) -> Result<usize, StoreError> {
        let discovery = Discovery::new(self.client.clone()).run().await.map_err(|e| map_kube_error("discovery", e))?;
        let mut table = FxHashMap::default();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                table.insert((ar.api_version.clone(), ar.kind.clone()), (ar, namespaced));
            }
        }
        let n = table.len();
        self.discovery.store(Arc::new(table));
        info!(resources = n, "discovery refreshed");
        Ok(n)
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<Resolved, StoreError> {
        let key = (api_version.to_string(), kind.to_string());
        if let Some(hit) = self.discovery.load().get(&key) {
            return Ok(hit.clone());
        }
        debug!(api_version, kind, "discovery miss");
        self.refresh_discovery().await?;
        self.discovery
            .load()
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::Invalid(format!("no kind {} is served for version {}", kind, api_version)))
    }

    async fn api(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Result<(Api<DynamicObject>, ApiResource), StoreError> {
        let (ar, namespaced) = self.resolve(api_version, kind).await?;
        let api = match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (true, None) => Api::all_with(self.client.clone(), &ar),
            (false, _) => Api::all_with(self.client.clone(), &ar),
        };
        Ok((api, ar))
    }

    /// Cluster-wide api for watching one kind.
    pub(crate) async fn watch_api(&self, api_version: &str, kind: &str) -> Result<(Api<DynamicObject>, ApiResource), StoreError> {
        self.api(api_version, kind, None).await
    }

    /// Api for a single object; namespaced kinds need a namespace.
    async fn api_for(&self, r: &TypedRef) -> Result<(Api<DynamicObject>, ApiResource), StoreError> {
        let (_, namespaced) = self.resolve(&r.api_version, &r.kind).await?;
        if namespaced && r.namespace.is_none() {
            return Err(StoreError::Invalid(format!("{}: namespace is required", r)));
        }
        self.api(&r.api_version, &r.kind, r.namespace.as_deref()).await
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, r: &TypedRef) -> Result<Document, StoreError> {
        let (api, ar) = self.api_for(r).await?;
        let obj = api.get(&r.name).await.map_err(|e| map_kube_error(&r.to_string(), e))?;
        to_document(obj, &ar)
    }

    async fn list(&self, api_version: &str, kind: &str, namespace: Option<&str>, labels: &BTreeMap<String, String>) -> Result<Vec<Document>, StoreError> {
        let (api, ar) = self.api(api_version, kind, namespace).await?;
        let selector = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",");
        let lp = if selector.is_empty() { ListParams::default() } else { ListParams::default().labels(&selector) };
        let list = api.list(&lp).await.map_err(|e| map_kube_error(&format!("{}/{}", api_version, kind), e))?;
        list.items.into_iter().map(|o| to_document(o, &ar)).collect()
    }

    async fn create(&self, obj: &Document) -> Result<Document, StoreError> {
        let r = TypedRef::of(obj);
        let (api, ar) = self.api_for(&r).await?;
        let pp = PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..Default::default() };
        let created = api.create(&pp, &to_dynamic(obj)?).await.map_err(|e| map_kube_error(&r.to_string(), e))?;
        to_document(created, &ar)
    }

    async fn update(&self, obj: &Document) -> Result<Document, StoreError> {
        let r = TypedRef::of(obj);
        let (api, ar) = self.api_for(&r).await?;
        let pp = PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..Default::default() };
        let updated = api.replace(&r.name, &pp, &to_dynamic(obj)?).await.map_err(|e| map_kube_error(&r.to_string(), e))?;
        to_document(updated, &ar)
    }

    async fn update_status(&self, obj: &Document) -> Result<Document, StoreError> {
        let r = TypedRef::of(obj);
        let (api, ar) = self.api_for(&r).await?;
        let body = serde_json::to_vec(&to_dynamic(obj)?).map_err(|e| StoreError::Other(format!("{}: {}", r, e)))?;
        let pp = PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..Default::default() };
        let updated = api.replace_status(&r.name, &pp, body).await.map_err(|e| map_kube_error(&r.to_string(), e))?;
        to_document(updated, &ar)
    }

    async fn dry_run_apply(&self, obj: &Document) -> Result<(), StoreError> {
        let r = TypedRef::of(obj);
        let (api, _) = self.api_for(&r).await?;
        let mut body = obj.clone();
        if let Some(meta) = body.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("resourceVersion");
        }
        let pp = PatchParams::apply(FIELD_MANAGER).dry_run().force();
        api.patch(&r.name, &pp, &Patch::Apply(&body)).await.map_err(|e| map_kube_error(&r.to_string(), e))?;
        Ok(())
    }

    async fn delete(&self, r: &TypedRef) -> Result<(), StoreError> {
        let (api, _) = self.api_for(r).await?;
        api.delete(&r.name, &DeleteParams::background()).await.map_err(|e| map_kube_error(&r.to_string(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "nope".into(), reason: reason.into(), code })
    }

    #[test]
    fn kind_keys() {
        assert_eq!(parse_kind_key("v1/Secret").unwrap(), ("v1".to_string(), "Secret".to_string()));
        assert_eq!(parse_kind_key("example.org/v1/XBucket").unwrap(), ("example.org/v1".to_string(), "XBucket".to_string()));
        assert!(parse_kind_key("XBucket").is_err());
        assert!(parse_kind_key("a//B").is_err());
    }

    #[test]
    fn api_errors_map_onto_the_store_taxonomy() {
        assert!(map_kube_error("x", api_error(404, "NotFound")).is_not_found());
        assert!(map_kube_error("x", api_error(409, "AlreadyExists")).is_already_exists());
        assert!(map_kube_error("x", api_error(409, "Conflict")).is_conflict());
        assert!(matches!(map_kube_error("x", api_error(422, "Invalid")), StoreError::Invalid(_)));
        assert!(matches!(map_kube_error("x", api_error(500, "InternalError")), StoreError::Other(_)));
    }

    #[test]
    fn documents_convert_to_dynamic_objects() {
        let doc = serde_json::json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "c", "namespace": "ns", "managedFields": [{"manager": "x"}]},
            "data": {"k": "v"}
        });
        let obj = to_dynamic(&doc).unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("c"));
        assert!(obj.metadata.managed_fields.is_none());
        assert_eq!(obj.data["data"]["k"], "v");
    }
}
