//! Rendering a template into the desired state of one composed resource.

use anyhow::{anyhow, bail, Context, Result};
use conflux_core::meta::{ObjectExt, OwnerReference, TypedRef};
use conflux_core::{Document, ANNOTATION_RESOURCE_NAME, LABEL_CLAIM_NAME, LABEL_CLAIM_NAMESPACE, LABEL_COMPOSITE};
use conflux_store::ResourceStore;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::associate::Association;
use crate::names;
use crate::patch;

/// The template's base with identity and ownership filled in: the existing resource's
/// name and namespace when there is one, else a fresh `{composite}-xxxxx` name.
pub async fn seed_identity(
    store: &dyn ResourceStore,
    composite: &Document,
    assoc: &Association,
    taken: &mut FxHashSet<String>,
    name_attempts: usize,
) -> Result<Document> {
    let mut doc = assoc.template.base.clone();
    if !doc.is_object() {
        bail!("base is not an object");
    }
    if doc.api_version().is_empty() || doc.kind().is_empty() {
        bail!("base must set apiVersion and kind");
    }

    let observed = match (&assoc.observed, &assoc.existing) {
        (Some(obj), _) => Some(obj.clone()),
        (None, Some(r)) => store.get_opt(r).await.with_context(|| format!("cannot get composed resource {}", r))?,
        (None, None) => None,
    };
    match (&observed, &assoc.existing) {
        (Some(obj), _) => {
            doc.set_name(obj.name());
            doc.set_namespace(obj.namespace());
            if let (Some(meta), Some(live)) = (doc.get_mut("metadata").and_then(Value::as_object_mut), obj.get("metadata")) {
                for key in ["uid", "resourceVersion"] {
                    if let Some(v) = live.get(key) {
                        meta.insert(key.to_string(), v.clone());
                    }
                }
            }
        }
        (None, Some(r)) => {
            doc.set_name(&r.name);
            if doc.namespace().is_none() {
                doc.set_namespace(r.namespace.as_deref());
            }
        }
        (None, None) if !doc.name().is_empty() => {}
        (None, None) => {
            let probe = TypedRef::of(&doc);
            let name = names::generate_name(store, &probe, composite.name(), taken, name_attempts).await?;
            doc.set_name(&name);
        }
    }

    doc.set_label(LABEL_COMPOSITE, composite.name());
    let labels = composite.labels();
    for key in [LABEL_CLAIM_NAME, LABEL_CLAIM_NAMESPACE] {
        if let Some(v) = labels.get(key) {
            doc.set_label(key, v);
        }
    }
    if let Some(name) = assoc.template.named() {
        doc.set_annotation(ANNOTATION_RESOURCE_NAME, name);
    }
    if composite.uid().is_none() {
        return Err(anyhow!("composite {} has no uid", composite.name()));
    }
    doc.add_owner_reference(OwnerReference::controller_of(composite));
    Ok(doc)
}

/// Apply the template's composite-to-composed patches onto a seeded document.
pub fn apply_patches(assoc: &Association, composite: &Document, doc: &mut Document) -> Result<()> {
    patch::apply_from_composite(&assoc.template.patches, composite, doc)
}
