//! Resource-scoped events: the secondary visibility channel next to status conditions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::meta::TypedRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

impl Event {
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self { type_: EventType::Normal, reason: reason.to_string(), message: message.into() }
    }

    /// Warning carrying the full causal chain of `err`.
    pub fn warning(reason: &str, err: &anyhow::Error) -> Self {
        Self { type_: EventType::Warning, reason: reason.to_string(), message: format!("{:#}", err) }
    }
}

/// Well-known event reasons.
pub mod reasons {
    pub const SELECT_COMPOSITION: &str = "SelectComposition";
    pub const COMPOSE_RESOURCES: &str = "ComposeResources";
    pub const RENDER_RESOURCE: &str = "RenderComposedResource";
    pub const APPLY_RESOURCE: &str = "ApplyComposedResource";
    pub const OBSERVE_RESOURCE: &str = "ObserveComposedResource";
    pub const GARBAGE_COLLECT: &str = "GarbageCollectComposedResource";
    pub const PUBLISH_CONNECTION: &str = "PublishConnectionSecret";
    pub const RUN_FUNCTION: &str = "RunCompositionFunction";
    pub const BIND_COMPOSITE: &str = "BindCompositeResource";
    pub const CONFIGURE_COMPOSITE: &str = "ConfigureCompositeResource";
    pub const DELETE_COMPOSITE: &str = "DeleteCompositeResource";
}

/// Sink for events. Recording is fire-and-forget and never fails reconciliation.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, object: &TypedRef, event: Event);
}

/// Recorder that only logs.
pub struct LogRecorder;

#[async_trait]
impl EventRecorder for LogRecorder {
    async fn record(&self, object: &TypedRef, event: Event) {
        match event.type_ {
            EventType::Normal => tracing::info!(object = %object, reason = %event.reason, "{}", event.message),
            EventType::Warning => tracing::warn!(object = %object, reason = %event.reason, "{}", event.message),
        }
    }
}
