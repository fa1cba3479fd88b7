use anyhow::{anyhow, Result};
use conflux_core::conditions::{self, ConditionStatus};
use conflux_core::fieldpath;
use serde_json::Value;

use crate::types::{ReadinessCheck, ReadinessCheckType};

/// Whether an observed composed resource is ready. With no checks configured the
/// resource must report `Ready=True`; otherwise every check has to pass.
/// A misconfigured check is an error; a missing field just means not ready.
pub fn is_ready(observed: &Value, checks: &[ReadinessCheck]) -> Result<bool> {
    if checks.is_empty() {
        return Ok(conditions::is_ready(observed));
    }
    for (i, c) in checks.iter().enumerate() {
        if !check(observed, c).map_err(|e| anyhow!("readiness check {}: {}", i, e))? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn check(observed: &Value, c: &ReadinessCheck) -> Result<bool, String> {
    let path = || c.field_path.as_deref().filter(|p| !p.is_empty()).ok_or_else(|| "fieldPath is required".to_string());
    let value = |p: &str| fieldpath::get_opt(observed, p).map(|v| v.cloned()).map_err(|e| e.to_string());
    Ok(match c.type_ {
        ReadinessCheckType::None => true,
        ReadinessCheckType::NonEmpty => match value(path()?)? {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(m)) => !m.is_empty(),
            Some(_) => true,
        },
        ReadinessCheckType::MatchString => {
            let want = c.match_string.as_deref().ok_or("matchString is required")?;
            value(path()?)?.as_ref().and_then(Value::as_str) == Some(want)
        }
        ReadinessCheckType::MatchInteger => {
            let want = c.match_integer.ok_or("matchInteger is required")?;
            value(path()?)?.as_ref().and_then(Value::as_i64) == Some(want)
        }
        ReadinessCheckType::MatchCondition => {
            let want = c.match_condition.as_ref().ok_or("matchCondition is required")?;
            let status = match want.status.as_str() {
                "True" => ConditionStatus::True,
                "False" => ConditionStatus::False,
                "Unknown" => ConditionStatus::Unknown,
                other => return Err(format!("unknown condition status {:?}", other)),
            };
            conditions::condition(observed, &want.type_).map(|got| got.status == status).unwrap_or(false)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchConditionSpec;
    use serde_json::json;

    fn check_of(type_: ReadinessCheckType, path: &str) -> ReadinessCheck {
        ReadinessCheck { type_, field_path: Some(path.into()), match_string: None, match_integer: None, match_condition: None }
    }

    #[test]
    fn defaults_to_the_ready_condition() {
        let ready = json!({"status": {"conditions": [{"type": "Ready", "status": "True", "reason": "Available"}]}});
        assert!(is_ready(&ready, &[]).unwrap());
        assert!(!is_ready(&json!({}), &[]).unwrap());
    }

    #[test]
    fn every_check_must_pass() {
        let obj = json!({"status": {"phase": "Running", "replicas": 3, "endpoint": ""}});
        let phase = ReadinessCheck { match_string: Some("Running".into()), ..check_of(ReadinessCheckType::MatchString, "status.phase") };
        let replicas = ReadinessCheck { match_integer: Some(3), ..check_of(ReadinessCheckType::MatchInteger, "status.replicas") };
        assert!(is_ready(&obj, &[phase.clone(), replicas]).unwrap());
        let endpoint = check_of(ReadinessCheckType::NonEmpty, "status.endpoint");
        assert!(!is_ready(&obj, &[phase, endpoint]).unwrap());
        assert!(!is_ready(&obj, &[check_of(ReadinessCheckType::NonEmpty, "status.missing")]).unwrap());
    }

    #[test]
    fn match_condition_and_misconfiguration() {
        let obj = json!({"status": {"conditions": [{"type": "Synced", "status": "True", "reason": "ReconcileSuccess"}]}});
        let synced = ReadinessCheck {
            match_condition: Some(MatchConditionSpec { type_: "Synced".into(), status: "True".into() }),
            ..check_of(ReadinessCheckType::MatchCondition, "")
        };
        assert!(is_ready(&obj, &[synced]).unwrap());
        let broken = check_of(ReadinessCheckType::MatchString, "status.phase");
        assert!(is_ready(&obj, &[broken]).unwrap_err().to_string().contains("matchString is required"));
    }
}
