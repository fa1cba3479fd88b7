//! Connection details and their Secret encoding.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::meta::{ObjectExt, OwnerReference, SecretRef};

/// Credentials keyed by name. Values are raw bytes.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Decode the `data` of a Secret document. Values that are not valid base64 are kept verbatim.
pub fn from_secret(secret: &Value) -> ConnectionDetails {
    let mut out = ConnectionDetails::new();
    if let Some(Value::Object(data)) = secret.get("data") {
        for (k, v) in data {
            if let Some(s) = v.as_str() {
                let bytes = STANDARD.decode(s).unwrap_or_else(|_| s.as_bytes().to_vec());
                out.insert(k.clone(), bytes);
            }
        }
    }
    out
}

/// Build a Secret document carrying `details`, controlled by `owner`.
pub fn to_secret(r: &SecretRef, owner: &Value, details: &ConnectionDetails) -> Value {
    let data: Map<String, Value> = details.iter().map(|(k, v)| (k.clone(), Value::String(STANDARD.encode(v)))).collect();
    let mut secret = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": r.name },
        "type": "connection.conflux.dev/v1alpha1",
        "data": Value::Object(data),
    });
    secret.set_namespace(r.namespace.as_deref());
    secret.add_owner_reference(OwnerReference::controller_of(owner));
    secret
}
