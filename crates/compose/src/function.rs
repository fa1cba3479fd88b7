//! Composition functions: the request/response contract and the pipeline driver.
//!
//! A composition in `Pipeline` mode hands the observed state to each step in turn; each
//! step returns a revised desired state. The desired resources of the last step are
//! then composed exactly like named templates without patches.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use conflux_core::event::{reasons, Event};
use conflux_core::meta::ObjectExt;
use conflux_core::xr::XrExt;
use conflux_core::{Document, ANNOTATION_RESOURCE_NAME};
use conflux_store::ResourceStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::types::{ComposedTemplate, PipelineStep};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub composite: Value,
    /// Keyed by composition resource name.
    #[serde(default)]
    pub resources: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFunctionRequest {
    pub observed: State,
    pub desired: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Fatal,
    Warning,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFunctionResponse {
    pub desired: State,
    #[serde(default)]
    pub results: Vec<FunctionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[async_trait]
pub trait FunctionRunner: Send + Sync {
    async fn run_function(&self, function: &str, req: RunFunctionRequest) -> Result<RunFunctionResponse>;
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub desired: State,
    pub events: Vec<Event>,
}

impl PipelineOutput {
    /// Desired resources as named templates, ordered by name.
    pub fn templates(&self) -> Vec<ComposedTemplate> {
        self.desired
            .resources
            .iter()
            .map(|(name, base)| ComposedTemplate { name: Some(name.clone()), base: base.clone(), ..Default::default() })
            .collect()
    }
}

/// Current composite plus its composed resources, keyed by their template name
/// annotation. Resources without the annotation are not observable by functions.
pub async fn observe(store: &dyn ResourceStore, composite: &Document) -> Result<State> {
    let mut resources = BTreeMap::new();
    for r in composite.resource_refs() {
        if let Some(obj) = store.get_opt(&r).await.with_context(|| format!("cannot get composed resource {}", r))? {
            if let Some(name) = obj.annotation(ANNOTATION_RESOURCE_NAME).map(str::to_string) {
                resources.insert(name, obj);
            }
        }
    }
    Ok(State { composite: composite.clone(), resources })
}

/// Run every step in order. A `Fatal` result stops the pipeline with an error.
#[instrument(skip_all, fields(steps = steps.len()))]
pub async fn run_pipeline(runner: &dyn FunctionRunner, steps: &[PipelineStep], observed: State) -> Result<PipelineOutput> {
    let mut desired = State::default();
    let mut context = None;
    let mut events = Vec::new();
    for step in steps {
        let req = RunFunctionRequest { observed: observed.clone(), desired, input: step.input.clone(), context };
        let resp = runner
            .run_function(&step.function_ref.name, req)
            .await
            .with_context(|| format!("cannot run pipeline step {:?}", step.step))?;
        for r in &resp.results {
            match r.severity {
                Severity::Fatal => bail!("pipeline step {:?} returned a fatal result: {}", step.step, r.message),
                Severity::Warning => events.push(Event::warning(reasons::RUN_FUNCTION, &anyhow::anyhow!("pipeline step {:?}: {}", step.step, r.message))),
                Severity::Normal => events.push(Event::normal(reasons::RUN_FUNCTION, format!("pipeline step {:?}: {}", step.step, r.message))),
            }
        }
        debug!(step = %step.step, resources = resp.desired.resources.len(), "pipeline step done");
        desired = resp.desired;
        context = resp.context;
    }
    Ok(PipelineOutput { desired, events })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionReference;
    use serde_json::json;
    use std::sync::Mutex;

    /// Adds one resource named after the function and records what it saw.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, usize)>>,
        fatal_on: Option<String>,
    }

    #[async_trait]
    impl FunctionRunner for Recording {
        async fn run_function(&self, function: &str, req: RunFunctionRequest) -> Result<RunFunctionResponse> {
            self.seen.lock().unwrap().push((function.to_string(), req.desired.resources.len()));
            let mut desired = req.desired;
            desired.resources.insert(function.to_string(), json!({"apiVersion": "v1", "kind": "ConfigMap"}));
            let mut results = vec![FunctionResult { severity: Severity::Warning, message: "careful".into() }];
            if self.fatal_on.as_deref() == Some(function) {
                results.push(FunctionResult { severity: Severity::Fatal, message: "boom".into() });
            }
            Ok(RunFunctionResponse { desired, results, context: req.context })
        }
    }

    fn step(name: &str) -> PipelineStep {
        PipelineStep { step: name.into(), function_ref: FunctionReference { name: name.into() }, input: None }
    }

    #[tokio::test]
    async fn steps_see_the_previous_desired_state() {
        let runner = Recording::default();
        let out = run_pipeline(&runner, &[step("a"), step("b")], State::default()).await.unwrap();
        assert_eq!(*runner.seen.lock().unwrap(), vec![("a".to_string(), 0), ("b".to_string(), 1)]);
        let names: Vec<_> = out.templates().into_iter().filter_map(|t| t.name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(out.events.len(), 2);
    }

    #[tokio::test]
    async fn fatal_results_abort() {
        let runner = Recording { fatal_on: Some("a".into()), ..Default::default() };
        let err = run_pipeline(&runner, &[step("a"), step("b")], State::default()).await.unwrap_err();
        assert!(err.to_string().contains("fatal result: boom"));
        assert_eq!(runner.seen.lock().unwrap().len(), 1);
    }
}
