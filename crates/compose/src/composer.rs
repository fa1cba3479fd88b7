//! One composition pass: associate, render, record references, apply, observe.

use std::sync::Arc;

use anyhow::{Context, Result};
use conflux_core::connection::{self, ConnectionDetails};
use conflux_core::event::{reasons, Event};
use conflux_core::meta::{ObjectExt, TypedRef};
use conflux_core::xr::XrExt;
use conflux_core::Document;
use conflux_store::ResourceStore;
use metrics::counter;
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::associate::{associate, Association, AssociationMode};
use crate::types::ComposedTemplate;
use crate::{names, patch, readiness, render};

#[derive(Debug, Clone, Copy)]
pub struct ComposerOptions {
    /// Ask the store to validate each composed resource before writing it.
    pub dry_run: bool,
    pub name_attempts: usize,
}

impl Default for ComposerOptions {
    fn default() -> Self {
        Self { dry_run: false, name_attempts: names::DEFAULT_ATTEMPTS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedOutcome {
    /// Template name, or `resources[i]` for unnamed templates.
    pub template: String,
    pub resource: Option<TypedRef>,
    pub ready: bool,
}

#[derive(Debug, Default)]
pub struct CompositionResult {
    pub resources: Vec<ComposedOutcome>,
    pub connection_details: ConnectionDetails,
    /// Warnings for resources that could not be rendered, applied or observed.
    pub events: Vec<Event>,
    pub deleted: Vec<TypedRef>,
}

impl CompositionResult {
    pub fn all_ready(&self) -> bool {
        self.resources.iter().all(|r| r.ready)
    }

    pub fn ready_count(&self) -> usize {
        self.resources.iter().filter(|r| r.ready).count()
    }
}

fn without_status(doc: &Document) -> Document {
    let mut doc = doc.clone();
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("status");
    }
    doc
}

struct Slot {
    id: String,
    assoc: Association,
    desired: Option<Document>,
    rendered: bool,
}

pub struct Composer {
    store: Arc<dyn ResourceStore>,
    options: ComposerOptions,
}

impl Composer {
    pub fn new(store: Arc<dyn ResourceStore>, options: ComposerOptions) -> Self {
        Self { store, options }
    }

    /// Compose `templates` for `composite`.
    ///
    /// The composite's `spec.resourceRefs` is written to the store before any composed
    /// resource is, so a crash mid-pass never leaves an untracked resource behind. On
    /// return `composite` holds the stored object plus any `ToCompositeFieldPath` results;
    /// spec changes are already persisted, status changes are not.
    /// A failure confined to one resource becomes a warning in the result and the pass
    /// carries on with the rest.
    #[instrument(skip_all, fields(composite = %composite.name()))]
    pub async fn compose(&self, composite: &mut Document, templates: Vec<ComposedTemplate>) -> Result<CompositionResult> {
        let store = self.store.as_ref();
        let associated = associate(store, composite, templates).await.context("cannot associate composed resources")?;
        let mode = associated.mode;
        let mut result = CompositionResult { deleted: associated.deleted, ..Default::default() };

        let mut taken: FxHashSet<String> = associated.pairs.iter().filter_map(|a| a.existing.as_ref().map(|r| r.name.clone())).collect();
        let mut slots = Vec::with_capacity(associated.pairs.len());
        for (i, assoc) in associated.pairs.into_iter().enumerate() {
            let id = assoc.template.display_name(i);
            let seeded = render::seed_identity(store, composite, &assoc, &mut taken, self.options.name_attempts).await;
            let (desired, rendered) = match seeded {
                Ok(mut doc) => match render::apply_patches(&assoc, composite, &mut doc) {
                    Ok(()) => (Some(doc), true),
                    Err(e) => {
                        self.fail(&mut result, reasons::RENDER_RESOURCE, e.context(format!("cannot render composed resource {:?}", id)));
                        (Some(doc), false)
                    }
                },
                Err(e) => {
                    self.fail(&mut result, reasons::RENDER_RESOURCE, e.context(format!("cannot render composed resource {:?}", id)));
                    (None, false)
                }
            };
            slots.push(Slot { id, assoc, desired, rendered });
        }

        // A positional slot keeps its drawn name so later templates stay aligned; a named
        // slot that failed to render keeps only what already exists.
        let positional = mode == AssociationMode::Positional;
        let refs: Vec<TypedRef> = slots
            .iter()
            .filter_map(|s| match &s.desired {
                Some(d) if s.rendered || positional => Some(TypedRef::of(d)),
                _ => s.assoc.existing.clone(),
            })
            .collect();
        if composite.set_resource_refs(&refs) {
            let stored = store.update(composite).await.context("cannot persist composed resource references")?;
            *composite = stored;
            debug!(count = refs.len(), "recorded composed resource references");
        }

        let before = without_status(composite);
        for slot in slots {
            let outcome = self.observe(&mut result, composite, slot).await;
            result.resources.push(outcome);
        }

        // Patches back onto the composite's spec or metadata must be persisted too;
        // status is left to the caller.
        if without_status(composite) != before {
            let status = composite.get("status").cloned();
            let mut stored = store.update(composite).await.context("cannot persist patches to the composite")?;
            if let (Some(status), Some(obj)) = (status, stored.as_object_mut()) {
                obj.insert("status".to_string(), status);
            }
            *composite = stored;
        }
        Ok(result)
    }

    async fn observe(&self, result: &mut CompositionResult, composite: &mut Document, slot: Slot) -> ComposedOutcome {
        let store = self.store.as_ref();
        let Slot { id, assoc, desired, rendered } = slot;
        let existing = assoc.existing.clone();
        let not_ready = |resource: Option<TypedRef>| ComposedOutcome { template: id.clone(), resource, ready: false };
        let desired = match desired {
            Some(d) if rendered => d,
            Some(d) => return not_ready(Some(TypedRef::of(&d))),
            None => return not_ready(existing),
        };
        let r = TypedRef::of(&desired);

        if self.options.dry_run {
            if let Err(e) = conflux_apply::dry_run(store, &desired).await {
                self.fail(result, reasons::APPLY_RESOURCE, e.context(format!("composed resource {:?}", id)));
                return not_ready(Some(r));
            }
        }
        let observed = match conflux_apply::apply(store, &desired).await {
            Ok(applied) => applied.object,
            Err(e) => {
                self.fail(result, reasons::APPLY_RESOURCE, e.context(format!("cannot apply composed resource {:?}", id)));
                return not_ready(Some(r));
            }
        };

        let template = &assoc.template;
        if !template.connection_details.is_empty() {
            let secret = match observed.write_connection_secret_to_ref() {
                Some(mut sr) => {
                    if sr.namespace.is_none() {
                        sr.namespace = observed.namespace().map(str::to_string);
                    }
                    match store.get_opt(&sr.typed()).await {
                        Ok(s) => s.map(|s| connection::from_secret(&s)).unwrap_or_default(),
                        Err(e) => {
                            let e = anyhow::Error::new(e).context(format!("cannot get connection secret of composed resource {:?}", id));
                            self.fail(result, reasons::OBSERVE_RESOURCE, e);
                            ConnectionDetails::new()
                        }
                    }
                }
                None => ConnectionDetails::new(),
            };
            match crate::connection::extract(&template.connection_details, &observed, &secret) {
                // Later templates overwrite earlier ones on key collisions.
                Ok(details) => result.connection_details.extend(details),
                Err(e) => self.fail(result, reasons::OBSERVE_RESOURCE, e.context(format!("cannot extract connection details of {:?}", id))),
            }
        }

        let ready = match readiness::is_ready(&observed, &template.readiness_checks) {
            Ok(ready) => ready,
            Err(e) => {
                self.fail(result, reasons::OBSERVE_RESOURCE, e.context(format!("cannot check readiness of {:?}", id)));
                false
            }
        };

        if let Err(e) = patch::apply_to_composite(&template.patches, &observed, composite) {
            self.fail(result, reasons::OBSERVE_RESOURCE, e.context(format!("cannot patch composite from {:?}", id)));
        }
        ComposedOutcome { template: id, resource: Some(TypedRef::of(&observed)), ready }
    }

    fn fail(&self, result: &mut CompositionResult, reason: &str, err: anyhow::Error) {
        warn!(reason, error = %format!("{:#}", err), "composed resource failed");
        if reason == reasons::RENDER_RESOURCE {
            counter!("composed_render_errors_total", 1u64);
        }
        result.events.push(Event::warning(reason, &err));
    }
}
