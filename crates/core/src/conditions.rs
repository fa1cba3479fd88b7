//! Status conditions (`Ready`, `Synced`) with machine-readable reasons.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fieldpath;

pub const TYPE_READY: &str = "Ready";
pub const TYPE_SYNCED: &str = "Synced";

/// Well-known condition reasons.
pub mod reasons {
    pub const AVAILABLE: &str = "Available";
    pub const CREATING: &str = "Creating";
    pub const DELETING: &str = "Deleting";
    pub const WAITING: &str = "Waiting";
    pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    pub const RECONCILE_PAUSED: &str = "ReconcilePaused";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    fn new(type_: &str, status: ConditionStatus, reason: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: None,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn available() -> Self {
        Self::new(TYPE_READY, ConditionStatus::True, reasons::AVAILABLE)
    }

    pub fn creating() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, reasons::CREATING)
    }

    pub fn deleting() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, reasons::DELETING)
    }

    pub fn waiting() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, reasons::WAITING)
    }

    pub fn reconcile_success() -> Self {
        Self::new(TYPE_SYNCED, ConditionStatus::True, reasons::RECONCILE_SUCCESS)
    }

    pub fn reconcile_error(err: &anyhow::Error) -> Self {
        Self::new(TYPE_SYNCED, ConditionStatus::False, reasons::RECONCILE_ERROR).with_message(format!("{:#}", err))
    }

    /// Same type, status, reason and message.
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.type_ == other.type_ && self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Conditions stored at `status.conditions`. Unparseable entries are skipped.
pub fn conditions(obj: &Value) -> Vec<Condition> {
    match fieldpath::get(obj, "status.conditions") {
        Ok(Value::Array(items)) => items.iter().filter_map(|c| serde_json::from_value(c.clone()).ok()).collect(),
        _ => Vec::new(),
    }
}

pub fn condition(obj: &Value, type_: &str) -> Option<Condition> {
    conditions(obj).into_iter().find(|c| c.type_ == type_)
}

/// True only when the `Ready` condition is exactly `True`.
pub fn is_ready(obj: &Value) -> bool {
    condition(obj, TYPE_READY).map(|c| c.status == ConditionStatus::True).unwrap_or(false)
}

/// Set conditions, keeping the transition time of any that did not change.
/// Returns whether anything changed.
pub fn set_conditions(obj: &mut Value, updates: impl IntoIterator<Item = Condition>) -> bool {
    let mut current = conditions(obj);
    let mut changed = false;
    for c in updates {
        match current.iter_mut().find(|e| e.type_ == c.type_) {
            Some(existing) if existing.equivalent(&c) => {}
            Some(existing) => {
                *existing = c;
                changed = true;
            }
            None => {
                current.push(c);
                changed = true;
            }
        }
    }
    if changed {
        if let Ok(v) = serde_json::to_value(&current) {
            let _ = fieldpath::set(obj, "status.conditions", v);
        }
    }
    changed
}
