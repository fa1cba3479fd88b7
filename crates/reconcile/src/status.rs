//! Status writes shared by the reconcilers.

use anyhow::{Context, Result};
use conflux_core::conditions::{self, Condition};
use conflux_core::meta::ObjectExt;
use conflux_core::Document;
use conflux_store::ResourceStore;
use serde_json::Value;
use tracing::debug;

/// Set `conds` on `obj` and write its status, unless the status is still `before`.
pub(crate) async fn commit(store: &dyn ResourceStore, mut obj: Document, before: Option<&Value>, conds: Vec<Condition>) -> Result<()> {
    conditions::set_conditions(&mut obj, conds);
    if obj.get("status") == before {
        return Ok(());
    }
    store.update_status(&obj).await.with_context(|| format!("cannot update status of {} {}", obj.kind(), obj.name()))?;
    debug!(object = %obj.name(), "status updated");
    Ok(())
}

/// Persist everything but status, keeping the in-memory status for a later commit.
pub(crate) async fn update_keeping_status(store: &dyn ResourceStore, obj: &mut Document) -> Result<()> {
    let status = obj.get("status").cloned();
    let mut stored = store.update(obj).await.with_context(|| format!("cannot update {} {}", obj.kind(), obj.name()))?;
    if let (Some(status), Some(map)) = (status, stored.as_object_mut()) {
        map.insert("status".to_string(), status);
    }
    *obj = stored;
    Ok(())
}
