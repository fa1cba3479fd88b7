//! Object metadata accessors and references over dynamic documents.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fieldpath;

/// Reference to a typed object: the identity used for store lookups and work-queue keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TypedRef {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { api_version: api_version.into(), kind: kind.into(), name: name.into(), namespace: None }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Reference to an existing document. Missing identity fields become empty strings.
    pub fn of(obj: &Value) -> Self {
        Self {
            api_version: obj.api_version().to_string(),
            kind: obj.kind().to_string(),
            name: obj.name().to_string(),
            namespace: obj.namespace().map(str::to_string),
        }
    }

    pub fn group(&self) -> &str {
        self.api_version.split_once('/').map(|(g, _)| g).unwrap_or("")
    }
}

impl fmt::Display for TypedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", self.api_version, self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", self.api_version, self.kind, self.name),
        }
    }
}

/// Back-reference from a composite to the claim bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ClaimRef {
    pub fn of(claim: &Value) -> Self {
        Self {
            api_version: claim.api_version().to_string(),
            kind: claim.kind().to_string(),
            namespace: claim.namespace().unwrap_or_default().to_string(),
            name: claim.name().to_string(),
            uid: claim.uid().map(str::to_string),
        }
    }

    /// Equal in everything but the UID.
    pub fn same_object_ignoring_uid(&self, other: &ClaimRef) -> bool {
        self.api_version == other.api_version && self.kind == other.kind && self.namespace == other.namespace && self.name == other.name
    }

    pub fn typed(&self) -> TypedRef {
        TypedRef::new(&self.api_version, &self.kind, &self.name).in_namespace(&self.namespace)
    }
}

impl fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}/{}", self.api_version, self.kind, self.namespace, self.name)?;
        if let Some(uid) = &self.uid {
            write!(f, " (uid {})", uid)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// Controller reference pointing at `owner`.
    pub fn controller_of(owner: &Value) -> Self {
        Self {
            api_version: owner.api_version().to_string(),
            kind: owner.kind().to_string(),
            name: owner.name().to_string(),
            uid: owner.uid().unwrap_or_default().to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    pub fn is_controller(&self) -> bool {
        self.controller.unwrap_or(false)
    }
}

/// Name/namespace pair pointing at a connection secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretRef {
    pub fn typed(&self) -> TypedRef {
        let r = TypedRef::new("v1", "Secret", &self.name);
        match &self.namespace {
            Some(ns) => r.in_namespace(ns),
            None => r,
        }
    }
}

/// True when `obj` carries a controller owner reference with the given UID.
pub fn is_controlled_by(obj: &Value, owner_uid: &str) -> bool {
    !owner_uid.is_empty() && obj.controller_ref().map(|r| r.uid == owner_uid).unwrap_or(false)
}

/// Metadata accessors for dynamic documents.
pub trait ObjectExt {
    fn api_version(&self) -> &str;
    fn kind(&self) -> &str;
    fn name(&self) -> &str;
    fn namespace(&self) -> Option<&str>;
    fn uid(&self) -> Option<&str>;
    fn resource_version(&self) -> Option<&str>;
    fn labels(&self) -> BTreeMap<String, String>;
    fn annotations(&self) -> BTreeMap<String, String>;
    fn annotation(&self, key: &str) -> Option<&str>;
    fn finalizers(&self) -> Vec<String>;
    fn owner_references(&self) -> Vec<OwnerReference>;
    fn controller_ref(&self) -> Option<OwnerReference>;
    fn is_deleting(&self) -> bool;

    fn set_name(&mut self, name: &str);
    fn set_namespace(&mut self, namespace: Option<&str>);
    fn set_label(&mut self, key: &str, value: &str);
    fn set_annotation(&mut self, key: &str, value: &str);
    fn add_finalizer(&mut self, finalizer: &str) -> bool;
    fn remove_finalizer(&mut self, finalizer: &str) -> bool;
    /// Add `owner` unless a reference with the same UID is present.
    fn add_owner_reference(&mut self, owner: OwnerReference);
}

fn str_at<'a>(v: &'a Value, path: &str) -> Option<&'a str> {
    fieldpath::get(v, path).ok().and_then(Value::as_str)
}

fn string_map(v: &Value, path: &str) -> BTreeMap<String, String> {
    match fieldpath::get(v, path) {
        Ok(Value::Object(m)) => m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect(),
        _ => BTreeMap::new(),
    }
}

fn metadata_mut(v: &mut Value) -> Option<&mut Map<String, Value>> {
    let obj = v.as_object_mut()?;
    let meta = obj.entry("metadata").or_insert_with(|| Value::Object(Map::new()));
    if meta.is_null() {
        *meta = Value::Object(Map::new());
    }
    meta.as_object_mut()
}

fn map_entry<'a>(meta: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    let entry = meta.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if entry.is_null() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut()
}

impl ObjectExt for Value {
    fn api_version(&self) -> &str {
        str_at(self, "apiVersion").unwrap_or("")
    }

    fn kind(&self) -> &str {
        str_at(self, "kind").unwrap_or("")
    }

    fn name(&self) -> &str {
        str_at(self, "metadata.name").unwrap_or("")
    }

    fn namespace(&self) -> Option<&str> {
        str_at(self, "metadata.namespace").filter(|s| !s.is_empty())
    }

    fn uid(&self) -> Option<&str> {
        str_at(self, "metadata.uid").filter(|s| !s.is_empty())
    }

    fn resource_version(&self) -> Option<&str> {
        str_at(self, "metadata.resourceVersion").filter(|s| !s.is_empty())
    }

    fn labels(&self) -> BTreeMap<String, String> {
        string_map(self, "metadata.labels")
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        string_map(self, "metadata.annotations")
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.get("metadata")?.get("annotations")?.get(key)?.as_str()
    }

    fn finalizers(&self) -> Vec<String> {
        match fieldpath::get(self, "metadata.finalizers") {
            Ok(Value::Array(a)) => a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        }
    }

    fn owner_references(&self) -> Vec<OwnerReference> {
        fieldpath::get(self, "metadata.ownerReferences")
            .ok()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    fn controller_ref(&self) -> Option<OwnerReference> {
        self.owner_references().into_iter().find(OwnerReference::is_controller)
    }

    fn is_deleting(&self) -> bool {
        str_at(self, "metadata.deletionTimestamp").map(|s| !s.is_empty()).unwrap_or(false)
    }

    fn set_name(&mut self, name: &str) {
        if let Some(meta) = metadata_mut(self) {
            meta.insert("name".into(), Value::String(name.to_string()));
        }
    }

    fn set_namespace(&mut self, namespace: Option<&str>) {
        if let Some(meta) = metadata_mut(self) {
            match namespace {
                Some(ns) => {
                    meta.insert("namespace".into(), Value::String(ns.to_string()));
                }
                None => {
                    meta.remove("namespace");
                }
            }
        }
    }

    fn set_label(&mut self, key: &str, value: &str) {
        if let Some(labels) = metadata_mut(self).and_then(|m| map_entry(m, "labels")) {
            labels.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    fn set_annotation(&mut self, key: &str, value: &str) {
        if let Some(annos) = metadata_mut(self).and_then(|m| map_entry(m, "annotations")) {
            annos.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    fn add_finalizer(&mut self, finalizer: &str) -> bool {
        let mut current = self.finalizers();
        if current.iter().any(|f| f == finalizer) {
            return false;
        }
        current.push(finalizer.to_string());
        if let Some(meta) = metadata_mut(self) {
            meta.insert("finalizers".into(), Value::from(current));
        }
        true
    }

    fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let current = self.finalizers();
        let kept: Vec<String> = current.iter().filter(|f| *f != finalizer).cloned().collect();
        if kept.len() == current.len() {
            return false;
        }
        if let Some(meta) = metadata_mut(self) {
            if kept.is_empty() {
                meta.remove("finalizers");
            } else {
                meta.insert("finalizers".into(), Value::from(kept));
            }
        }
        true
    }

    fn add_owner_reference(&mut self, owner: OwnerReference) {
        let mut refs = self.owner_references();
        if refs.iter().any(|r| r.uid == owner.uid) {
            return;
        }
        refs.push(owner);
        if let (Some(meta), Ok(v)) = (metadata_mut(self), serde_json::to_value(&refs)) {
            meta.insert("ownerReferences".into(), v);
        }
    }
}
