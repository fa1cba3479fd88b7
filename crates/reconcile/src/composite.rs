//! Reconciler for composite resources.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use conflux_compose::function::{self, FunctionRunner};
use conflux_compose::{inline_patch_sets, validate, ComposedTemplate, Composer, ComposerOptions, Composition, CompositionMode};
use conflux_core::conditions::Condition;
use conflux_core::event::{reasons, Event, EventRecorder};
use conflux_core::fieldpath;
use conflux_core::meta::{is_controlled_by, ObjectExt, TypedRef};
use conflux_core::xr::XrExt;
use conflux_core::{Document, FINALIZER_COMPOSITE};
use conflux_store::ResourceStore;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::configurator::{self, configure_composite};
use crate::selector::{CompositionCache, CompositionSelector};
use crate::status;
use crate::{Action, ReconcilerConfig, Reconciler};

pub struct CompositeReconciler {
    store: Arc<dyn ResourceStore>,
    recorder: Arc<dyn EventRecorder>,
    selector: Arc<dyn CompositionSelector>,
    compositions: CompositionCache,
    composer: Composer,
    functions: Option<Arc<dyn FunctionRunner>>,
    config: ReconcilerConfig,
}

/// Templates for one pass plus anything the pipeline wants written onto the composite.
struct Desired {
    templates: Vec<ComposedTemplate>,
    composite_status: Option<Value>,
    events: Vec<Event>,
}

impl CompositeReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        recorder: Arc<dyn EventRecorder>,
        selector: Arc<dyn CompositionSelector>,
        config: ReconcilerConfig,
    ) -> Self {
        let composer = Composer::new(Arc::clone(&store), ComposerOptions { dry_run: config.dry_run, name_attempts: config.name_attempts });
        Self { compositions: CompositionCache::new(Arc::clone(&store)), store, recorder, selector, composer, functions: None, config }
    }

    /// Runner for compositions in pipeline mode.
    pub fn with_functions(mut self, runner: Arc<dyn FunctionRunner>) -> Self {
        self.functions = Some(runner);
        self
    }

    async fn finish(&self, xr: Document, before: Option<Value>, conds: Vec<Condition>, action: Action) -> Result<Action> {
        status::commit(self.store.as_ref(), xr, before.as_ref(), conds).await?;
        Ok(action)
    }

    /// Record a warning, mark the composite as not synced and requeue.
    async fn fail(&self, key: &TypedRef, xr: Document, before: Option<Value>, reason: &str, err: anyhow::Error, action: Action) -> Result<Action> {
        warn!(composite = %key, reason, error = %format!("{:#}", err), "composite reconcile failed");
        let cond = Condition::reconcile_error(&err);
        self.recorder.record(key, Event::warning(reason, &err)).await;
        self.finish(xr, before, vec![cond], action).await
    }

    async fn delete(&self, key: &TypedRef, mut xr: Document) -> Result<Action> {
        configurator::unpublish(self.store.as_ref(), &xr).await.context("cannot unpublish connection details")?;
        let uid = xr.uid().unwrap_or_default().to_string();
        for r in xr.resource_refs() {
            let Some(obj) = self.store.get_opt(&r).await.with_context(|| format!("cannot get composed resource {}", r))? else {
                continue;
            };
            if !is_controlled_by(&obj, &uid) {
                continue;
            }
            match self.store.delete(&r).await {
                Ok(()) => debug!(composite = %key, resource = %r, "deleted composed resource"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e).with_context(|| format!("cannot delete composed resource {}", r)),
            }
        }
        if xr.remove_finalizer(FINALIZER_COMPOSITE) {
            self.store.update(&xr).await.context("cannot remove composite finalizer")?;
        }
        info!(composite = %key, "composite resource deleted");
        Ok(Action::await_change())
    }

    async fn desired(&self, comp: &Composition, xr: &Document) -> Result<Desired> {
        match comp.spec.mode {
            CompositionMode::Resources => {
                let templates = inline_patch_sets(comp)?;
                Ok(Desired { templates, composite_status: None, events: Vec::new() })
            }
            CompositionMode::Pipeline => {
                let runner = self.functions.as_deref().ok_or_else(|| anyhow!("composition {:?} uses a function pipeline but no function runner is configured", comp.name()))?;
                let observed = function::observe(self.store.as_ref(), xr).await.context("cannot observe composed resources")?;
                let out = function::run_pipeline(runner, &comp.spec.pipeline, observed).await.context("cannot run composition function pipeline")?;
                let templates = out.templates();
                let composite_status = out.desired.composite.get("status").cloned();
                Ok(Desired { templates, composite_status, events: out.events })
            }
        }
    }
}

#[async_trait]
impl Reconciler for CompositeReconciler {
    fn name(&self) -> &'static str {
        "composite"
    }

    #[instrument(skip(self), fields(composite = %key))]
    async fn reconcile(&self, key: &TypedRef) -> Result<Action> {
        let short = Action::requeue(self.config.short_wait);
        let Some(mut xr) = self.store.get_opt(key).await.context("cannot get composite resource")? else {
            debug!("composite resource is gone");
            return Ok(Action::await_change());
        };
        if xr.is_deleting() {
            return self.delete(key, xr).await;
        }
        if xr.add_finalizer(FINALIZER_COMPOSITE) {
            xr = self.store.update(&xr).await.context("cannot add composite finalizer")?;
        }
        let before = xr.get("status").cloned();

        let selected = xr.composition_ref();
        if let Err(e) = self.selector.select(&mut xr).await {
            return self.fail(key, xr, before, reasons::SELECT_COMPOSITION, e.context("cannot select composition"), short).await;
        }
        let Some(comp_name) = xr.composition_ref() else {
            let e = anyhow!("no composition selected");
            return self.fail(key, xr, before, reasons::SELECT_COMPOSITION, e, short).await;
        };
        if selected.as_deref() != Some(comp_name.as_str()) {
            xr = self.store.update(&xr).await.context("cannot record selected composition")?;
            self.recorder.record(key, Event::normal(reasons::SELECT_COMPOSITION, format!("Selected composition {:?}", comp_name))).await;
        }

        let comp = match self.compositions.fetch(&comp_name).await {
            Ok(c) => c,
            Err(e) => return self.fail(key, xr, before, reasons::SELECT_COMPOSITION, e, short).await,
        };
        // An invalid composition cannot be fixed by retrying; wait for it to change.
        if let Err(e) = validate(&comp) {
            let e = anyhow::Error::new(e).context(format!("composition {:?} is invalid", comp_name));
            return self.fail(key, xr, before, reasons::COMPOSE_RESOURCES, e, Action::await_change()).await;
        }

        match configure_composite(&mut xr, &comp) {
            Ok(true) => xr = self.store.update(&xr).await.context("cannot update configured composite resource")?,
            Ok(false) => {}
            Err(e) => return self.fail(key, xr, before, reasons::CONFIGURE_COMPOSITE, e, short).await,
        }

        let desired = match self.desired(&comp, &xr).await {
            Ok(d) => d,
            Err(e) => return self.fail(key, xr, before, reasons::COMPOSE_RESOURCES, e, short).await,
        };
        for ev in desired.events {
            self.recorder.record(key, ev).await;
        }

        let res = match self.composer.compose(&mut xr, desired.templates).await {
            Ok(r) => r,
            Err(e) => return self.fail(key, xr, before, reasons::COMPOSE_RESOURCES, e.context("cannot compose resources"), short).await,
        };
        for ev in &res.events {
            self.recorder.record(key, ev.clone()).await;
        }
        for r in &res.deleted {
            self.recorder.record(key, Event::normal(reasons::GARBAGE_COLLECT, format!("Deleted composed resource {}", r))).await;
        }
        if let Some(status) = &desired.composite_status {
            match xr.get_mut("status") {
                Some(cur) => fieldpath::merge(cur, status),
                None => {
                    let _ = fieldpath::set(&mut xr, "status", status.clone());
                }
            }
        }

        if !res.connection_details.is_empty() {
            if let Some(target) = xr.write_connection_secret_to_ref() {
                match configurator::publish(self.store.as_ref(), &xr, &target, &res.connection_details).await {
                    Ok(true) => xr.set_connection_published_now(),
                    Ok(false) => {}
                    Err(e) => return self.fail(key, xr, before, reasons::PUBLISH_CONNECTION, e, short).await,
                }
            }
        }

        let total = res.resources.len();
        let ready = res.ready_count();
        let (ready_cond, action) = if res.all_ready() {
            (Condition::available(), Action::requeue(self.config.poll_interval))
        } else {
            (Condition::creating().with_message(format!("{} of {} composed resources are ready", ready, total)), short)
        };
        debug!(ready, total, "composed resources");
        self.finish(xr, before, vec![Condition::reconcile_success(), ready_cond], action).await
    }
}
