//! Extraction of connection details from composed resources.

use anyhow::{anyhow, Result};
use conflux_core::connection::ConnectionDetails;
use conflux_core::fieldpath;
use serde_json::Value;

use crate::types::{ConnectionDetail, ConnectionDetailType};

/// Pick the configured details out of a composed resource and its connection secret.
/// Keys absent from the secret or paths absent from the resource are skipped.
pub fn extract(details: &[ConnectionDetail], observed: &Value, secret: &ConnectionDetails) -> Result<ConnectionDetails> {
    let mut out = ConnectionDetails::new();
    for (i, d) in details.iter().enumerate() {
        let bad = |what: &str| anyhow!("connection detail {}: {}", i, what);
        match d.effective_type().ok_or_else(|| bad("cannot determine its type"))? {
            ConnectionDetailType::FromConnectionSecretKey => {
                let key = d.from_connection_secret_key.as_deref().ok_or_else(|| bad("fromConnectionSecretKey is required"))?;
                let name = d.name.as_deref().unwrap_or(key);
                if let Some(v) = secret.get(key) {
                    out.insert(name.to_string(), v.clone());
                }
            }
            ConnectionDetailType::FromFieldPath => {
                let path = d.from_field_path.as_deref().ok_or_else(|| bad("fromFieldPath is required"))?;
                let name = d.name.as_deref().ok_or_else(|| bad("name is required"))?;
                let value = fieldpath::get_opt(observed, path).map_err(|e| bad(&e.to_string()))?;
                match value {
                    None | Some(Value::Null) => {}
                    Some(Value::String(s)) => {
                        out.insert(name.to_string(), s.as_bytes().to_vec());
                    }
                    Some(other) => {
                        out.insert(name.to_string(), other.to_string().into_bytes());
                    }
                }
            }
            ConnectionDetailType::FromValue => {
                let name = d.name.as_deref().ok_or_else(|| bad("name is required"))?;
                let value = d.value.as_deref().ok_or_else(|| bad("value is required"))?;
                out.insert(name.to_string(), value.as_bytes().to_vec());
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_each_kind_of_detail() {
        let mut secret = ConnectionDetails::new();
        secret.insert("password".into(), b"pw".to_vec());
        secret.insert("unused".into(), b"x".to_vec());
        let observed = json!({"status": {"atProvider": {"endpoint": "db.local", "port": 5432}}});
        let details = vec![
            ConnectionDetail { from_connection_secret_key: Some("password".into()), ..Default::default() },
            ConnectionDetail { name: Some("user".into()), from_connection_secret_key: Some("username".into()), ..Default::default() },
            ConnectionDetail { name: Some("host".into()), from_field_path: Some("status.atProvider.endpoint".into()), ..Default::default() },
            ConnectionDetail { name: Some("port".into()), from_field_path: Some("status.atProvider.port".into()), ..Default::default() },
            ConnectionDetail { name: Some("engine".into()), value: Some("postgres".into()), ..Default::default() },
        ];
        let got = extract(&details, &observed, &secret).unwrap();
        let keys: Vec<_> = got.keys().map(String::as_str).collect();
        assert_eq!(keys, ["engine", "host", "password", "port"]);
        assert_eq!(got["port"], b"5432");
        assert_eq!(got["password"], b"pw");
    }

    #[test]
    fn from_value_requires_a_name() {
        let details = vec![ConnectionDetail { value: Some("v".into()), ..Default::default() }];
        assert!(extract(&details, &json!({}), &ConnectionDetails::new()).is_err());
    }
}
