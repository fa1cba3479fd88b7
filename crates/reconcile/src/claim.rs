//! Reconciler for claims: namespaced requests that are bound one-to-one to a composite.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use conflux_compose::names;
use conflux_compose::types::TypeReference;
use conflux_core::conditions::{self, Condition};
use conflux_core::connection;
use conflux_core::error::is_already_exists;
use conflux_core::event::{reasons, Event, EventRecorder};
use conflux_core::fieldpath;
use conflux_core::meta::{ClaimRef, ObjectExt, SecretRef, TypedRef};
use conflux_core::xr::XrExt;
use conflux_core::{Document, FINALIZER_CLAIM, LABEL_CLAIM_NAME, LABEL_CLAIM_NAMESPACE};
use conflux_store::ResourceStore;
use rustc_hash::FxHashSet;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::configurator;
use crate::status;
use crate::{Action, Reconciler, ReconcilerConfig};

/// Spec fields that describe the claim itself and are not copied to its composite.
const CLAIM_ONLY_FIELDS: [&str; 3] = ["resourceRef", "writeConnectionSecretToRef", "compositeDeletePolicy"];

/// The composite is already bound to a different claim.
#[derive(Debug, Error)]
#[error("composite resource {composite} is bound to claim {bound}, not {claim}")]
pub struct BindError {
    pub composite: String,
    pub bound: ClaimRef,
    pub claim: ClaimRef,
}

/// Point `composite` at `claim`. A UID-less back-reference is adopted if it names the
/// same claim; once a UID is recorded it must match.
pub fn bind(claim: &Document, composite: &mut Document) -> Result<(), BindError> {
    let want = ClaimRef::of(claim);
    if let Some(existing) = composite.claim_ref() {
        let same = match existing.uid {
            None => existing.same_object_ignoring_uid(&want),
            Some(_) => existing == want,
        };
        if !same {
            return Err(BindError { composite: composite.name().to_string(), bound: existing, claim: want });
        }
        if existing == want {
            return Ok(());
        }
    }
    composite.set_claim_ref(&want);
    Ok(())
}

/// Copy the claim's spec (minus claim-only fields) and labels onto the composite.
pub fn configure_composite(claim: &Document, composite: &mut Document) {
    if let Some(Value::Object(spec)) = claim.get("spec") {
        let mut spec = spec.clone();
        for k in CLAIM_ONLY_FIELDS {
            spec.remove(k);
        }
        let spec = Value::Object(spec);
        match composite.get_mut("spec") {
            Some(cur) => fieldpath::merge(cur, &spec),
            None => {
                let _ = fieldpath::set(composite, "spec", spec);
            }
        }
    }
    for (k, v) in claim.labels() {
        if !k.starts_with("conflux.dev/") {
            composite.set_label(&k, &v);
        }
    }
    composite.set_label(LABEL_CLAIM_NAME, claim.name());
    composite.set_label(LABEL_CLAIM_NAMESPACE, claim.namespace().unwrap_or_default());
    if claim.write_connection_secret_to_ref().is_some() && composite.write_connection_secret_to_ref().is_none() {
        if let Some(uid) = claim.uid() {
            composite.set_write_connection_secret_to_ref(&SecretRef { name: uid.to_string(), namespace: None });
        }
    }
}

/// Reflect the composite back onto the claim: the resolved composition and every
/// status field except conditions and connection details. Returns whether the
/// claim's spec changed.
pub fn configure_claim(claim: &mut Document, composite: &Document) -> bool {
    let mut spec_changed = false;
    if claim.composition_ref().is_none() {
        if let Some(name) = composite.composition_ref() {
            claim.set_composition_ref(&name);
            spec_changed = true;
        }
    }
    if let Some(Value::Object(st)) = composite.get("status") {
        let mut st = st.clone();
        st.remove("conditions");
        st.remove("connectionDetails");
        if !st.is_empty() {
            let st = Value::Object(st);
            match claim.get_mut("status") {
                Some(cur) => fieldpath::merge(cur, &st),
                None => {
                    let _ = fieldpath::set(claim, "status", st);
                }
            }
        }
    }
    spec_changed
}

pub struct ClaimReconciler {
    store: Arc<dyn ResourceStore>,
    recorder: Arc<dyn EventRecorder>,
    composite_type: TypeReference,
    config: ReconcilerConfig,
}

impl ClaimReconciler {
    pub fn new(store: Arc<dyn ResourceStore>, recorder: Arc<dyn EventRecorder>, composite_type: TypeReference, config: ReconcilerConfig) -> Self {
        Self { store, recorder, composite_type, config }
    }

    async fn fail(&self, key: &TypedRef, claim: Document, before: Option<Value>, reason: &str, err: anyhow::Error, action: Action) -> Result<Action> {
        warn!(claim = %key, reason, error = %format!("{:#}", err), "claim reconcile failed");
        let cond = Condition::reconcile_error(&err);
        self.recorder.record(key, Event::warning(reason, &err)).await;
        status::commit(self.store.as_ref(), claim, before.as_ref(), vec![cond]).await?;
        Ok(action)
    }

    async fn delete(&self, key: &TypedRef, mut claim: Document) -> Result<Action> {
        if let Some(r) = claim.resource_ref() {
            match self.store.get_opt(&r).await {
                Ok(Some(xr)) => {
                    let want = ClaimRef::of(&claim);
                    if xr.claim_ref().as_ref() != Some(&want) {
                        let e = anyhow!("composite resource {} is not bound to this claim; refusing to delete it", r);
                        self.recorder.record(key, Event::warning(reasons::DELETE_COMPOSITE, &e)).await;
                        return Ok(Action::await_change());
                    }
                    if !xr.is_deleting() {
                        match self.store.delete(&r).await {
                            Ok(()) => info!(claim = %key, composite = %r, "deleted composite resource"),
                            Err(e) if e.is_not_found() => {}
                            Err(e) => {
                                let e = anyhow::Error::new(e).context("cannot delete composite resource");
                                self.recorder.record(key, Event::warning(reasons::DELETE_COMPOSITE, &e)).await;
                                return Ok(Action::requeue(self.config.short_wait));
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let e = anyhow::Error::new(e).context("cannot get composite resource");
                    self.recorder.record(key, Event::warning(reasons::DELETE_COMPOSITE, &e)).await;
                    return Ok(Action::requeue(self.config.short_wait));
                }
            }
        }
        if claim.remove_finalizer(FINALIZER_CLAIM) {
            self.store.update(&claim).await.context("cannot remove claim finalizer")?;
        }
        Ok(Action::await_change())
    }

    async fn new_composite(&self, claim: &Document, taken: &mut FxHashSet<String>) -> Result<Document> {
        let probe = TypedRef::new(&self.composite_type.api_version, &self.composite_type.kind, "");
        let name = names::generate_name(self.store.as_ref(), &probe, claim.name(), taken, self.config.name_attempts).await?;
        Ok(json!({
            "apiVersion": self.composite_type.api_version,
            "kind": self.composite_type.kind,
            "metadata": {"name": name},
            "spec": {}
        }))
    }

    /// Copy the composite's connection secret into the claim's namespace.
    async fn propagate(&self, claim: &Document, composite: &Document, target: &SecretRef) -> Result<bool> {
        let Some(from) = composite.write_connection_secret_to_ref().filter(|r| r.namespace.is_some()) else {
            return Ok(false);
        };
        let Some(secret) = self.store.get_opt(&from.typed()).await.context("cannot get composite connection secret")? else {
            return Ok(false);
        };
        let details = connection::from_secret(&secret);
        configurator::publish(self.store.as_ref(), claim, target, &details).await
    }
}

#[async_trait]
impl Reconciler for ClaimReconciler {
    fn name(&self) -> &'static str {
        "claim"
    }

    #[instrument(skip(self), fields(claim = %key))]
    async fn reconcile(&self, key: &TypedRef) -> Result<Action> {
        let short = Action::requeue(self.config.short_wait);
        let Some(mut claim) = self.store.get_opt(key).await.context("cannot get claim")? else {
            debug!("claim is gone");
            return Ok(Action::await_change());
        };
        if claim.is_deleting() {
            return self.delete(key, claim).await;
        }
        if claim.add_finalizer(FINALIZER_CLAIM) {
            claim = self.store.update(&claim).await.context("cannot add claim finalizer")?;
        }
        let before = claim.get("status").cloned();

        let mut taken = FxHashSet::default();
        let recorded = claim.resource_ref();
        let existing = match &recorded {
            Some(r) => match self.store.get_opt(r).await {
                Ok(x) => x,
                Err(e) => {
                    let e = anyhow::Error::new(e).context("cannot get composite resource");
                    return self.fail(key, claim, before, reasons::CONFIGURE_COMPOSITE, e, short).await;
                }
            },
            None => None,
        };
        let generated = recorded.is_none();
        let mut xr = match (existing, &recorded) {
            (Some(xr), _) => xr,
            (None, Some(r)) => json!({"apiVersion": r.api_version, "kind": r.kind, "metadata": {"name": r.name}, "spec": {}}),
            (None, None) => match self.new_composite(&claim, &mut taken).await {
                Ok(xr) => xr,
                Err(e) => return self.fail(key, claim, before, reasons::CONFIGURE_COMPOSITE, e, short).await,
            },
        };

        configure_composite(&claim, &mut xr);
        if let Err(e) = bind(&claim, &mut xr) {
            // Retrying cannot resolve a conflicting binding.
            return self.fail(key, claim, before, reasons::BIND_COMPOSITE, anyhow::Error::new(e), Action::await_change()).await;
        }

        // A generated name is recorded on the claim before the composite exists, so a
        // failed claim write can never leave an unreferenced composite behind.
        let mut attempts = 1;
        let xr = loop {
            if generated {
                let r = TypedRef::of(&xr);
                if claim.resource_ref().as_ref() != Some(&r) {
                    claim.set_resource_ref(&r);
                    status::update_keeping_status(self.store.as_ref(), &mut claim).await.context("cannot record composite resource reference")?;
                }
            }
            match conflux_apply::apply(self.store.as_ref(), &xr).await {
                Ok(applied) => break applied.object,
                Err(e) if generated && is_already_exists(&e) && attempts < self.config.name_attempts => {
                    debug!(name = %xr.name(), "generated composite name was taken; drawing another");
                    attempts += 1;
                    let fresh = match self.new_composite(&claim, &mut taken).await {
                        Ok(x) => x,
                        Err(e) => return self.fail(key, claim, before, reasons::CONFIGURE_COMPOSITE, e, short).await,
                    };
                    xr.set_name(fresh.name());
                }
                Err(e) => {
                    let e = e.context("cannot apply composite resource");
                    return self.fail(key, claim, before, reasons::CONFIGURE_COMPOSITE, e, short).await;
                }
            }
        };

        let xr_ref = TypedRef::of(&xr);
        let mut spec_changed = false;
        if claim.resource_ref().as_ref() != Some(&xr_ref) {
            claim.set_resource_ref(&xr_ref);
            spec_changed = true;
        }
        spec_changed |= configure_claim(&mut claim, &xr);
        if spec_changed {
            status::update_keeping_status(self.store.as_ref(), &mut claim).await?;
        }
        if generated {
            self.recorder.record(key, Event::normal(reasons::BIND_COMPOSITE, format!("Bound composite resource {}", xr_ref))).await;
        }

        if !conditions::is_ready(&xr) {
            let waiting = Condition::waiting().with_message("Composite resource is not yet ready");
            status::commit(self.store.as_ref(), claim, before.as_ref(), vec![Condition::reconcile_success(), waiting]).await?;
            return Ok(Action::await_change());
        }

        if let Some(target) = claim.write_connection_secret_to_ref() {
            let target = SecretRef { name: target.name, namespace: claim.namespace().map(str::to_string) };
            match self.propagate(&claim, &xr, &target).await {
                Ok(true) => claim.set_connection_published_now(),
                Ok(false) => {}
                Err(e) => return self.fail(key, claim, before, reasons::PUBLISH_CONNECTION, e, short).await,
            }
        }
        status::commit(self.store.as_ref(), claim, before.as_ref(), vec![Condition::reconcile_success(), Condition::available()]).await?;
        Ok(Action::await_change())
    }
}
