//! Accessors for composite resources and claims.
//!
//! Composites and claims are user-defined types, so both are handled as dynamic
//! documents. The fields below live at the same paths on either kind.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::fieldpath;
use crate::meta::{ClaimRef, SecretRef, TypedRef};

pub trait XrExt {
    fn composition_ref(&self) -> Option<String>;
    fn set_composition_ref(&mut self, name: &str);
    fn composition_selector(&self) -> Option<BTreeMap<String, String>>;
    fn composition_revision_ref(&self) -> Option<String>;

    /// Composite: ordered references to composed resources.
    fn resource_refs(&self) -> Vec<TypedRef>;
    /// Returns whether the stored list changed.
    fn set_resource_refs(&mut self, refs: &[TypedRef]) -> bool;

    fn claim_ref(&self) -> Option<ClaimRef>;
    fn set_claim_ref(&mut self, r: &ClaimRef);

    /// Claim: reference to the bound composite.
    fn resource_ref(&self) -> Option<TypedRef>;
    fn set_resource_ref(&mut self, r: &TypedRef);

    fn write_connection_secret_to_ref(&self) -> Option<SecretRef>;
    fn set_write_connection_secret_to_ref(&mut self, r: &SecretRef);
    fn set_connection_published_now(&mut self);
}

fn str_at(v: &Value, path: &str) -> Option<String> {
    fieldpath::get(v, path).ok().and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

fn typed_at<T: serde::de::DeserializeOwned>(v: &Value, path: &str) -> Option<T> {
    fieldpath::get(v, path).ok().and_then(|x| serde_json::from_value(x.clone()).ok())
}

impl XrExt for Value {
    fn composition_ref(&self) -> Option<String> {
        str_at(self, "spec.compositionRef.name")
    }

    fn set_composition_ref(&mut self, name: &str) {
        let _ = fieldpath::set(self, "spec.compositionRef", json!({ "name": name }));
    }

    fn composition_selector(&self) -> Option<BTreeMap<String, String>> {
        typed_at(self, "spec.compositionSelector.matchLabels")
    }

    fn composition_revision_ref(&self) -> Option<String> {
        str_at(self, "spec.compositionRevisionRef.name")
    }

    fn resource_refs(&self) -> Vec<TypedRef> {
        typed_at(self, "spec.resourceRefs").unwrap_or_default()
    }

    fn set_resource_refs(&mut self, refs: &[TypedRef]) -> bool {
        if self.resource_refs() == refs {
            return false;
        }
        match serde_json::to_value(refs) {
            Ok(v) => fieldpath::set(self, "spec.resourceRefs", v).is_ok(),
            Err(_) => false,
        }
    }

    fn claim_ref(&self) -> Option<ClaimRef> {
        typed_at(self, "spec.claimRef")
    }

    fn set_claim_ref(&mut self, r: &ClaimRef) {
        if let Ok(v) = serde_json::to_value(r) {
            let _ = fieldpath::set(self, "spec.claimRef", v);
        }
    }

    fn resource_ref(&self) -> Option<TypedRef> {
        typed_at::<TypedRef>(self, "spec.resourceRef").filter(|r| !r.name.is_empty())
    }

    fn set_resource_ref(&mut self, r: &TypedRef) {
        let v = json!({ "apiVersion": r.api_version, "kind": r.kind, "name": r.name });
        let _ = fieldpath::set(self, "spec.resourceRef", v);
    }

    fn write_connection_secret_to_ref(&self) -> Option<SecretRef> {
        typed_at::<SecretRef>(self, "spec.writeConnectionSecretToRef").filter(|r| !r.name.is_empty())
    }

    fn set_write_connection_secret_to_ref(&mut self, r: &SecretRef) {
        if let Ok(v) = serde_json::to_value(r) {
            let _ = fieldpath::set(self, "spec.writeConnectionSecretToRef", v);
        }
    }

    fn set_connection_published_now(&mut self) {
        let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let _ = fieldpath::set(self, "status.connectionDetails.lastPublishedTime", Value::String(ts));
    }
}
