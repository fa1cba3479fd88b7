//! Events published to the cluster.

use async_trait::async_trait;
use conflux_core::event::{Event, EventRecorder, EventType};
use conflux_core::meta::TypedRef;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{self as kube_events, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Longest note the API server accepts on an event.
const MAX_NOTE: usize = 1024;

/// Fire-and-forget: publishing failures are logged and never reach the reconciler.
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str) -> Self {
        Self { client, reporter: Reporter { controller: controller.to_string(), instance: std::env::var("HOSTNAME").ok() } }
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, object: &TypedRef, event: Event) {
        let reference = ObjectReference {
            api_version: Some(object.api_version.clone()),
            kind: Some(object.kind.clone()),
            name: Some(object.name.clone()),
            namespace: object.namespace.clone(),
            ..Default::default()
        };
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference);
        let type_ = match event.type_ {
            EventType::Normal => kube_events::EventType::Normal,
            EventType::Warning => kube_events::EventType::Warning,
        };
        let reason = event.reason.clone();
        let ev = kube_events::Event { type_, reason: event.reason, note: Some(truncate(event.message, MAX_NOTE)), action: "Reconcile".into(), secondary: None };
        if let Err(e) = recorder.publish(ev).await {
            warn!(object = %object, reason = %reason, error = %e, "cannot publish event");
        }
    }
}
