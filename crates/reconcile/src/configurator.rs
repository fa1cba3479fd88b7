//! Composite configuration from its composition, and connection secret publishing.

use anyhow::{bail, Context, Result};
use conflux_apply::ApplyOutcome;
use conflux_compose::Composition;
use conflux_core::connection::{self, ConnectionDetails};
use conflux_core::meta::{is_controlled_by, ObjectExt, SecretRef};
use conflux_core::xr::XrExt;
use conflux_core::Document;
use conflux_store::ResourceStore;
use tracing::debug;

/// Check the composition fits the composite and default its connection secret
/// reference. Returns whether the composite changed.
pub fn configure_composite(composite: &mut Document, comp: &Composition) -> Result<bool> {
    let want = &comp.spec.composite_type_ref;
    if !want.matches(composite) {
        bail!(
            "composition {:?} composes {}/{}, not {}/{}",
            comp.name(),
            want.api_version,
            want.kind,
            composite.api_version(),
            composite.kind()
        );
    }
    let Some(ns) = comp.spec.write_connection_secrets_to_namespace.as_deref() else {
        return Ok(false);
    };
    let next = match composite.write_connection_secret_to_ref() {
        Some(r) if r.namespace.is_some() => return Ok(false),
        Some(r) => SecretRef { name: r.name, namespace: Some(ns.to_string()) },
        None => {
            let Some(uid) = composite.uid() else {
                bail!("composite {} has no uid", composite.name());
            };
            SecretRef { name: uid.to_string(), namespace: Some(ns.to_string()) }
        }
    };
    composite.set_write_connection_secret_to_ref(&next);
    Ok(true)
}

/// Write `details` to the secret `target`, controlled by `owner`. Returns whether the
/// stored secret changed.
pub async fn publish(store: &dyn ResourceStore, owner: &Document, target: &SecretRef, details: &ConnectionDetails) -> Result<bool> {
    if target.namespace.is_none() {
        bail!("connection secret {:?} has no namespace", target.name);
    }
    if let Some(live) = store.get_opt(&target.typed()).await.context("cannot get connection secret")? {
        if !is_controlled_by(&live, owner.uid().unwrap_or_default()) {
            bail!("connection secret {:?} exists and is not controlled by {}", target.name, owner.name());
        }
    }
    let secret = connection::to_secret(target, owner, details);
    let applied = conflux_apply::apply(store, &secret).await.context("cannot apply connection secret")?;
    debug!(secret = %target.name, outcome = ?applied.outcome, keys = details.len(), "published connection details");
    Ok(applied.outcome != ApplyOutcome::Unchanged)
}

/// Delete the connection secret of `owner` when `owner` controls it.
pub async fn unpublish(store: &dyn ResourceStore, owner: &Document) -> Result<()> {
    let Some(target) = owner.write_connection_secret_to_ref() else {
        return Ok(());
    };
    let r = target.typed();
    let Some(secret) = store.get_opt(&r).await.context("cannot get connection secret")? else {
        return Ok(());
    };
    if !is_controlled_by(&secret, owner.uid().unwrap_or_default()) {
        return Ok(());
    }
    match store.delete(&r).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e).context("cannot delete connection secret"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::meta::TypedRef;
    use conflux_store::MemoryStore;
    use serde_json::json;

    fn composition(ns: Option<&str>) -> Composition {
        let mut doc = json!({
            "metadata": {"name": "c"},
            "spec": {"compositeTypeRef": {"apiVersion": "example.org/v1", "kind": "XBucket"}}
        });
        if let Some(ns) = ns {
            doc["spec"]["writeConnectionSecretsToNamespace"] = json!(ns);
        }
        Composition::from_document(&doc).unwrap()
    }

    fn xr() -> Document {
        json!({"apiVersion": "example.org/v1", "kind": "XBucket", "metadata": {"name": "xb", "uid": "u-1"}, "spec": {}})
    }

    #[test]
    fn defaults_the_secret_reference_once() {
        let mut x = xr();
        assert!(!configure_composite(&mut x, &composition(None)).unwrap());
        assert!(configure_composite(&mut x, &composition(Some("conn"))).unwrap());
        assert_eq!(x.write_connection_secret_to_ref(), Some(SecretRef { name: "u-1".into(), namespace: Some("conn".into()) }));
        assert!(!configure_composite(&mut x, &composition(Some("elsewhere"))).unwrap());
    }

    #[test]
    fn rejects_incompatible_compositions() {
        let mut x = xr();
        x["kind"] = json!("XQueue");
        let err = configure_composite(&mut x, &composition(None)).unwrap_err();
        assert!(err.to_string().contains("not example.org/v1/XQueue"), "{}", err);
    }

    #[tokio::test]
    async fn publish_is_idempotent_and_unpublish_respects_control() {
        let store = MemoryStore::default();
        let owner = xr();
        let target = SecretRef { name: "xb-conn".into(), namespace: Some("conn".into()) };
        let details = ConnectionDetails::from([("password".to_string(), b"pw".to_vec())]);
        assert!(publish(&store, &owner, &target, &details).await.unwrap());
        assert!(!publish(&store, &owner, &target, &details).await.unwrap());

        let mut with_ref = owner.clone();
        with_ref.set_write_connection_secret_to_ref(&target);
        unpublish(&store, &with_ref).await.unwrap();
        assert!(!store.contains(&target.typed()));

        let foreign = store.seed(json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "xb-conn", "namespace": "conn"}}));
        unpublish(&store, &with_ref).await.unwrap();
        assert!(store.contains(&TypedRef::of(&foreign)));
        assert!(publish(&store, &owner, &target, &details).await.is_err());
    }
}
