//! Offline rendering: one composition pass against an in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use conflux_compose::function::{self, FunctionRunner, RunFunctionRequest, RunFunctionResponse};
use conflux_compose::{inline_patch_sets, validate, ComposedOutcome, Composer, ComposerOptions, Composition, CompositionMode, COMPOSITION_API_VERSION, COMPOSITION_KIND};
use conflux_core::event::Event;
use conflux_core::fieldpath;
use conflux_core::meta::ObjectExt;
use conflux_core::Document;
use conflux_store::{MemoryStore, ResourceStore, Scope, TypeRegistry};
use serde::Serialize;

/// Canned responses keyed by function name, standing in for a function runtime.
#[derive(Debug, Default)]
pub struct CannedFunctions(pub BTreeMap<String, RunFunctionResponse>);

impl CannedFunctions {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(Self(serde_yaml::from_str(yaml).context("cannot parse function responses")?))
    }

    fn resources(&self) -> impl Iterator<Item = &Document> {
        self.0.values().flat_map(|r| r.desired.resources.values())
    }
}

fn scope_of(doc: &Document) -> Scope {
    if doc.namespace().is_some() {
        Scope::Namespaced
    } else {
        Scope::Cluster
    }
}

/// Every kind the render inputs can write: the composite, the composition's templates,
/// observed resources and canned function output. Anything else is rejected by the store.
pub fn registry_for(composite: &Document, composition: &Composition, observed: &[Document], functions: Option<&CannedFunctions>) -> TypeRegistry {
    let mut registry = TypeRegistry::with_core_types()
        .register(COMPOSITION_API_VERSION, COMPOSITION_KIND, Scope::Cluster)
        .register(composite.api_version(), composite.kind(), Scope::Cluster);
    let bases = composition.spec.resources.iter().map(|t| &t.base);
    let canned = functions.into_iter().flat_map(|f| f.resources());
    for doc in bases.chain(observed).chain(canned) {
        if !doc.api_version().is_empty() && !doc.kind().is_empty() {
            registry = registry.register(doc.api_version(), doc.kind(), scope_of(doc));
        }
    }
    registry
}

#[async_trait]
impl FunctionRunner for CannedFunctions {
    async fn run_function(&self, function: &str, req: RunFunctionRequest) -> Result<RunFunctionResponse> {
        let canned = self.0.get(function).ok_or_else(|| anyhow!("no canned response for function {:?}", function))?;
        let mut desired = req.desired;
        desired.resources.extend(canned.desired.resources.clone());
        if desired.composite.is_null() {
            desired.composite = canned.desired.composite.clone();
        } else {
            fieldpath::merge(&mut desired.composite, &canned.desired.composite);
        }
        Ok(RunFunctionResponse { desired, results: canned.results.clone(), context: req.context })
    }
}

#[derive(Debug, Serialize)]
pub struct Rendered {
    pub composite: Document,
    pub resources: Vec<Document>,
    pub outcomes: Vec<ComposedOutcome>,
    pub events: Vec<Event>,
    pub connection_keys: Vec<String>,
}

pub async fn render(
    registry: TypeRegistry,
    composite: Document,
    composition: &Composition,
    observed: Vec<Document>,
    functions: Option<Arc<dyn FunctionRunner>>,
) -> Result<Rendered> {
    validate(composition).with_context(|| format!("composition {:?} is invalid", composition.name()))?;
    let store = Arc::new(MemoryStore::new(registry));
    for o in observed {
        store.seed(o);
    }
    let mut xr = store.seed(composite);
    let mut events = Vec::new();

    let templates = match composition.spec.mode {
        CompositionMode::Resources => inline_patch_sets(composition)?,
        CompositionMode::Pipeline => {
            let runner = functions.ok_or_else(|| anyhow!("composition {:?} uses a function pipeline; pass --functions", composition.name()))?;
            let state = function::observe(store.as_ref(), &xr).await?;
            let out = function::run_pipeline(runner.as_ref(), &composition.spec.pipeline, state).await?;
            if let Some(status) = out.desired.composite.get("status") {
                fieldpath::merge(&mut xr, &serde_json::json!({ "status": status }));
            }
            events.extend(out.events.iter().cloned());
            out.templates()
        }
    };

    let composer = Composer::new(store.clone(), ComposerOptions::default());
    let res = composer.compose(&mut xr, templates).await?;
    events.extend(res.events.iter().cloned());
    let mut resources = Vec::with_capacity(res.resources.len());
    for r in res.resources.iter().filter_map(|o| o.resource.as_ref()) {
        if let Some(doc) = store.get_opt(r).await? {
            resources.push(doc);
        }
    }
    Ok(Rendered {
        composite: xr,
        resources,
        outcomes: res.resources,
        events,
        connection_keys: res.connection_details.keys().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn composite() -> Document {
        json!({"apiVersion": "example.org/v1", "kind": "XQueue", "metadata": {"name": "xq"}, "spec": {"retention": 7}})
    }

    #[tokio::test]
    async fn renders_resources_mode() {
        let comp = Composition::from_document(&json!({
            "metadata": {"name": "queues"},
            "spec": {
                "compositeTypeRef": {"apiVersion": "example.org/v1", "kind": "XQueue"},
                "resources": [{
                    "name": "queue",
                    "base": {"apiVersion": "sqs.example.org/v1", "kind": "Queue", "spec": {}},
                    "patches": [{"fromFieldPath": "spec.retention", "toFieldPath": "spec.retentionDays", "transforms": [
                        {"type": "string", "string": {"fmt": "%dd"}}
                    ]}]
                }]
            }
        }))
        .unwrap();
        let registry = registry_for(&composite(), &comp, &[], None);
        let out = render(registry.clone(), composite(), &comp, vec![], None).await.unwrap();
        assert!(out.events.is_empty(), "{:?}", out.events);
        assert_eq!(out.resources.len(), 1);
        assert_eq!(out.resources[0]["spec"]["retentionDays"], "7d");
        assert_eq!(out.outcomes[0].template, "queue");
    }

    #[tokio::test]
    async fn renders_pipelines_from_canned_responses() {
        let canned = CannedFunctions::from_yaml(
            r#"
function-queue:
  desired:
    composite:
      status: {phase: ok}
    resources:
      queue:
        apiVersion: sqs.example.org/v1
        kind: Queue
        spec: {fifo: true}
"#,
        )
        .unwrap();
        let comp = Composition::from_document(&json!({
            "metadata": {"name": "queues"},
            "spec": {
                "compositeTypeRef": {"apiVersion": "example.org/v1", "kind": "XQueue"},
                "mode": "Pipeline",
                "pipeline": [{"step": "queue", "functionRef": {"name": "function-queue"}}]
            }
        }))
        .unwrap();
        let registry = registry_for(&composite(), &comp, &[], Some(&canned));
        assert_eq!(registry.scope("sqs.example.org/v1", "Queue"), Some(Scope::Cluster));
        let out = render(registry.clone(), composite(), &comp, vec![], Some(Arc::new(canned))).await.unwrap();
        assert_eq!(out.resources[0]["spec"]["fifo"], true);
        assert_eq!(out.composite["status"]["phase"], "ok");

        let err = render(registry, composite(), &comp, vec![], None).await.unwrap_err();
        assert!(err.to_string().contains("--functions"));
    }

    #[tokio::test]
    async fn kinds_outside_the_registry_are_rejected() {
        let comp = Composition::from_document(&json!({
            "metadata": {"name": "queues"},
            "spec": {
                "compositeTypeRef": {"apiVersion": "example.org/v1", "kind": "XQueue"},
                "resources": [{"name": "queue", "base": {"apiVersion": "sqs.example.org/v1", "kind": "Queue"}}]
            }
        }))
        .unwrap();
        let narrow = TypeRegistry::with_core_types().register("example.org/v1", "XQueue", Scope::Cluster);
        let out = render(narrow, composite(), &comp, vec![], None).await.unwrap();
        assert!(out.resources.is_empty());
        assert_eq!(out.events.len(), 1);
        assert!(out.events[0].message.contains("no kind Queue is registered"), "{}", out.events[0].message);
    }
}
