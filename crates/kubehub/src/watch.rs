//! List+watch streams feeding work-queue keys.

use std::sync::Arc;

use anyhow::Result;
use conflux_core::meta::{ObjectExt, TypedRef};
use conflux_core::xr::XrExt;
use conflux_core::Document;
use conflux_store::WorkQueue;
use futures::TryStreamExt;
use kube::runtime::watcher::{self, Event};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::KubeStore;

/// How a watched object turns into the key of the object to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    /// The object itself.
    Itself,
    /// The object's controller, when it is of this type.
    ControllerOf { api_version: String, kind: String },
    /// The claim a composite is bound to.
    Claim,
}

pub fn keys_for(obj: &Document, mapping: &Mapping) -> Option<TypedRef> {
    match mapping {
        Mapping::Itself => Some(TypedRef::of(obj)),
        Mapping::ControllerOf { api_version, kind } => obj
            .controller_ref()
            .filter(|o| &o.api_version == api_version && &o.kind == kind)
            .map(|o| TypedRef::new(o.api_version, o.kind, o.name)),
        Mapping::Claim => obj.claim_ref().map(|c| c.typed()),
    }
}

/// Watch one kind until `cancel` fires, enqueueing the mapped key of every object seen.
pub async fn watch_into_queue(
    store: &KubeStore,
    api_version: &str,
    kind: &str,
    mapping: Mapping,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) -> Result<()> {
    let (api, ar) = store.watch_api(api_version, kind).await?;
    let stream = watcher::watcher(api, watcher::Config::default());
    futures::pin_mut!(stream);
    info!(api_version, kind, mapping = ?mapping, "watch started");

    let enqueue = |o: kube::core::DynamicObject| {
        let mut doc = match serde_json::to_value(o) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "cannot serialize watched object");
                return;
            }
        };
        if let Some(map) = doc.as_object_mut() {
            map.insert("apiVersion".into(), ar.api_version.clone().into());
            map.insert("kind".into(), ar.kind.clone().into());
        }
        counter!("watch_events_total", 1u64, "kind" => ar.kind.clone());
        if let Some(key) = keys_for(&doc, &mapping) {
            queue.add(key);
        }
    };

    loop {
        let ev = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = stream.try_next() => ev?,
        };
        match ev {
            Some(Event::Applied(o)) | Some(Event::Deleted(o)) => enqueue(o),
            Some(Event::Restarted(list)) => {
                debug!(kind, count = list.len(), "watch restarted");
                list.into_iter().for_each(&enqueue);
            }
            None => {
                warn!(kind, "watch stream ended");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::meta::{ClaimRef, OwnerReference};
    use serde_json::json;

    #[test]
    fn mappings() {
        let xr = json!({"apiVersion": "example.org/v1", "kind": "XBucket", "metadata": {"name": "xb", "uid": "u"}});
        let mut composed = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm", "namespace": "infra"}});
        assert_eq!(keys_for(&composed, &Mapping::Itself), Some(TypedRef::new("v1", "ConfigMap", "cm").in_namespace("infra")));

        let to_xr = Mapping::ControllerOf { api_version: "example.org/v1".into(), kind: "XBucket".into() };
        assert_eq!(keys_for(&composed, &to_xr), None);
        composed.add_owner_reference(OwnerReference::controller_of(&xr));
        assert_eq!(keys_for(&composed, &to_xr), Some(TypedRef::new("example.org/v1", "XBucket", "xb")));
        let other = Mapping::ControllerOf { api_version: "example.org/v1".into(), kind: "XQueue".into() };
        assert_eq!(keys_for(&composed, &other), None);

        let claim = json!({"apiVersion": "example.org/v1", "kind": "Bucket", "metadata": {"name": "b", "namespace": "team-a"}});
        let mut bound = xr.clone();
        bound.set_claim_ref(&ClaimRef::of(&claim));
        assert_eq!(keys_for(&bound, &Mapping::Claim), Some(TypedRef::new("example.org/v1", "Bucket", "b").in_namespace("team-a")));
        assert_eq!(keys_for(&xr, &Mapping::Claim), None);
    }
}
