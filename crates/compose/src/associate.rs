//! Pairing templates with the resources composed from them on earlier passes, and
//! garbage-collecting resources whose template is gone.
//!
//! When every template is named and every existing resource carries the
//! resource-name annotation, pairing is by name. Otherwise it falls back to position:
//! template `i` pairs with the `i`th recorded reference.

use anyhow::{Context, Result};
use conflux_core::meta::{is_controlled_by, ObjectExt, TypedRef};
use conflux_core::xr::XrExt;
use conflux_core::{Document, ANNOTATION_RESOURCE_NAME};
use conflux_store::ResourceStore;
use metrics::counter;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::types::ComposedTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationMode {
    Positional,
    Named,
}

#[derive(Debug, Clone)]
pub struct Association {
    pub template: ComposedTemplate,
    /// Resource composed from this template on an earlier pass.
    pub existing: Option<TypedRef>,
    /// The resource as fetched during association, when it was fetched.
    pub observed: Option<Document>,
}

#[derive(Debug)]
pub struct Associated {
    pub mode: AssociationMode,
    /// One entry per template, in template order.
    pub pairs: Vec<Association>,
    pub deleted: Vec<TypedRef>,
}

/// An orphan is deleted only when `composite_uid` controls it; anything else the
/// composite merely referenced is left in place.
pub fn should_delete(obj: &Document, composite_uid: &str, wanted: bool) -> bool {
    !wanted && is_controlled_by(obj, composite_uid)
}

fn positional(templates: Vec<ComposedTemplate>, refs: &[TypedRef]) -> Vec<Association> {
    templates
        .into_iter()
        .enumerate()
        .map(|(i, template)| Association { template, existing: refs.get(i).cloned(), observed: None })
        .collect()
}

pub async fn associate(store: &dyn ResourceStore, composite: &Document, templates: Vec<ComposedTemplate>) -> Result<Associated> {
    let refs = composite.resource_refs();
    if templates.iter().any(|t| t.named().is_none()) {
        return Ok(Associated { mode: AssociationMode::Positional, pairs: positional(templates, &refs), deleted: Vec::new() });
    }

    let mut fetched = Vec::with_capacity(refs.len());
    for r in &refs {
        match store.get_opt(r).await.with_context(|| format!("cannot get composed resource {}", r))? {
            Some(obj) => fetched.push((r.clone(), obj)),
            None => debug!(resource = %r, "referenced composed resource is gone; dropping reference"),
        }
    }
    if fetched.iter().any(|(_, obj)| obj.annotation(ANNOTATION_RESOURCE_NAME).is_none()) {
        debug!("composed resource without a template name annotation; associating by position");
        return Ok(Associated { mode: AssociationMode::Positional, pairs: positional(templates, &refs), deleted: Vec::new() });
    }

    let names: FxHashSet<&str> = templates.iter().filter_map(|t| t.named()).collect();
    let composite_uid = composite.uid().unwrap_or_default();
    let mut by_name: FxHashMap<String, (TypedRef, Document)> = FxHashMap::default();
    let mut deleted = Vec::new();
    for (r, obj) in fetched {
        let name = obj.annotation(ANNOTATION_RESOURCE_NAME).unwrap_or_default().to_string();
        // First resource claiming a name wins; later duplicates are orphans.
        let wanted = names.contains(name.as_str()) && !by_name.contains_key(&name);
        if wanted {
            by_name.insert(name, (r, obj));
            continue;
        }
        if should_delete(&obj, composite_uid, wanted) {
            match store.delete(&r).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e).with_context(|| format!("cannot garbage collect composed resource {}", r)),
            }
            info!(resource = %r, template = %name, "garbage collected composed resource");
            counter!("composed_gc_deleted_total", 1u64);
            deleted.push(r);
        } else {
            debug!(resource = %r, "orphaned resource is not controlled by the composite; dropping reference");
        }
    }

    let pairs = templates
        .into_iter()
        .map(|template| {
            let found = template.named().and_then(|n| by_name.remove(n));
            let (existing, observed) = match found {
                Some((r, obj)) => (Some(r), Some(obj)),
                None => (None, None),
            };
            Association { template, existing, observed }
        })
        .collect();
    Ok(Associated { mode: AssociationMode::Named, pairs, deleted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::meta::OwnerReference;
    use conflux_store::{MemoryStore, Mutation};
    use serde_json::json;

    fn composite(refs: &[TypedRef]) -> Document {
        let mut xr = json!({"apiVersion": "example.org/v1", "kind": "XApp", "metadata": {"name": "xa", "uid": "xr-uid"}, "spec": {}});
        xr.set_resource_refs(refs);
        xr
    }

    fn template(name: Option<&str>) -> ComposedTemplate {
        ComposedTemplate { name: name.map(str::to_string), base: json!({"apiVersion": "v1", "kind": "ConfigMap"}), ..Default::default() }
    }

    fn composed(store: &MemoryStore, name: &str, template: Option<&str>, owner: Option<&Document>) -> TypedRef {
        let mut obj = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name}});
        if let Some(t) = template {
            obj.set_annotation(ANNOTATION_RESOURCE_NAME, t);
        }
        if let Some(o) = owner {
            obj.add_owner_reference(OwnerReference::controller_of(o));
        }
        TypedRef::of(&store.seed(obj))
    }

    #[tokio::test]
    async fn unnamed_templates_associate_by_position_without_fetching() {
        let store = MemoryStore::default();
        let refs = vec![TypedRef::new("v1", "ConfigMap", "a"), TypedRef::new("v1", "ConfigMap", "b"), TypedRef::new("v1", "ConfigMap", "c")];
        let got = associate(&store, &composite(&refs), vec![template(Some("x")), template(None)]).await.unwrap();
        assert_eq!(got.mode, AssociationMode::Positional);
        assert_eq!(got.pairs.len(), 2);
        assert_eq!(got.pairs[1].existing.as_ref().unwrap().name, "b");
        assert!(got.pairs.iter().all(|p| p.observed.is_none()));
    }

    #[tokio::test]
    async fn named_association_collects_controlled_orphans_only() {
        let store = MemoryStore::default();
        let xr = composite(&[]);
        let a = composed(&store, "xa-a", Some("a"), Some(&xr));
        let b = composed(&store, "xa-b", Some("b"), Some(&xr));
        let foreign = composed(&store, "other", Some("gone"), None);
        let stale = TypedRef::new("v1", "ConfigMap", "deleted-already");
        let xr = composite(&[a.clone(), b.clone(), foreign.clone(), stale]);

        let got = associate(&store, &xr, vec![template(Some("a"))]).await.unwrap();
        assert_eq!(got.mode, AssociationMode::Named);
        assert_eq!(got.pairs[0].existing.as_ref(), Some(&a));
        assert!(got.pairs[0].observed.is_some());
        assert_eq!(got.deleted, vec![b.clone()]);
        assert!(!store.contains(&b));
        assert!(store.contains(&foreign), "uncontrolled orphan must survive");
        assert!(store.mutations().iter().all(|m| !matches!(m, Mutation::Delete(r) if *r == foreign)));
    }

    #[tokio::test]
    async fn duplicate_claims_keep_the_first() {
        let store = MemoryStore::default();
        let xr = composite(&[]);
        let first = composed(&store, "xa-1", Some("a"), Some(&xr));
        let second = composed(&store, "xa-2", Some("a"), Some(&xr));
        let xr = composite(&[first.clone(), second.clone()]);
        let got = associate(&store, &xr, vec![template(Some("a"))]).await.unwrap();
        assert_eq!(got.pairs[0].existing.as_ref(), Some(&first));
        assert_eq!(got.deleted, vec![second]);
    }

    #[tokio::test]
    async fn missing_annotation_falls_back_to_position() {
        let store = MemoryStore::default();
        let xr = composite(&[]);
        let legacy = composed(&store, "xa-legacy", None, Some(&xr));
        let xr = composite(&[legacy.clone()]);
        let got = associate(&store, &xr, vec![template(Some("a")), template(Some("b"))]).await.unwrap();
        assert_eq!(got.mode, AssociationMode::Positional);
        assert_eq!(got.pairs[0].existing.as_ref(), Some(&legacy));
        assert!(got.pairs[1].existing.is_none());
        assert!(got.deleted.is_empty());
    }

    #[test]
    fn delete_predicate_requires_control() {
        let owner = json!({"apiVersion": "example.org/v1", "kind": "XApp", "metadata": {"name": "xa", "uid": "u"}});
        let mut obj = json!({"metadata": {"name": "o"}});
        assert!(!should_delete(&obj, "u", false));
        obj.add_owner_reference(OwnerReference::controller_of(&owner));
        assert!(should_delete(&obj, "u", false));
        assert!(!should_delete(&obj, "u", true));
        assert!(!should_delete(&obj, "someone-else", false));
    }
}
