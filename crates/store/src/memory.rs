//! In-memory store and event recorder.
//!
//! Models the datastore behaviours the reconcilers rely on: server-assigned UIDs and
//! resource versions, optimistic concurrency, a separate status write path, and
//! finalizer-gated deletion. Used by tests and by offline rendering.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use conflux_core::error::StoreError;
use conflux_core::event::{Event, EventRecorder, EventType};
use conflux_core::meta::{ObjectExt, TypedRef};
use conflux_core::Document;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::registry::TypeRegistry;
use crate::ResourceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    UpdateStatus,
    DryRun,
    Delete,
}

/// A recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create(TypedRef),
    Update(TypedRef),
    UpdateStatus(TypedRef),
    Delete(TypedRef),
}

impl Mutation {
    pub fn target(&self) -> &TypedRef {
        match self {
            Mutation::Create(r) | Mutation::Update(r) | Mutation::UpdateStatus(r) | Mutation::Delete(r) => r,
        }
    }
}

/// Injected failure: `op` on an object of `kind` (any kind when `None`) named `name`.
#[derive(Debug, Clone)]
pub struct FailureRule {
    pub op: Op,
    pub kind: Option<String>,
    pub name: String,
    pub error: StoreError,
}

#[derive(Default)]
struct State {
    objects: FxHashMap<TypedRef, Document>,
    next_rv: u64,
    mutations: Vec<Mutation>,
    failures: Vec<FailureRule>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    fn injected(&self, op: Op, r: &TypedRef) -> Option<StoreError> {
        self.failures
            .iter()
            .find(|f| f.op == op && f.name == r.name && f.kind.as_deref().map(|k| k == r.kind).unwrap_or(true))
            .map(|f| f.error.clone())
    }
}

pub struct MemoryStore {
    registry: TypeRegistry,
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(TypeRegistry::new())
    }
}

fn set_meta(obj: &mut Value, key: &str, value: Value) {
    if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(key.to_string(), value);
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

impl MemoryStore {
    /// With an empty registry every kind is accepted.
    pub fn new(registry: TypeRegistry) -> Self {
        Self { registry, state: Mutex::new(State::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn validate(&self, obj: &Document) -> Result<TypedRef, StoreError> {
        let r = TypedRef::of(obj);
        if r.api_version.is_empty() || r.kind.is_empty() {
            return Err(StoreError::Invalid("object is missing apiVersion or kind".into()));
        }
        if r.name.is_empty() {
            return Err(StoreError::Invalid(format!("{}/{}: metadata.name is required", r.api_version, r.kind)));
        }
        if !self.registry.is_empty() && self.registry.scope(&r.api_version, &r.kind).is_none() {
            return Err(StoreError::Invalid(format!("no kind {} is registered for version {}", r.kind, r.api_version)));
        }
        Ok(r)
    }

    /// Insert an object as if it already existed. Assigns identity fields when absent.
    pub fn seed(&self, mut obj: Document) -> Document {
        let r = TypedRef::of(&obj);
        let mut st = self.lock();
        let rv = st.bump();
        if obj.uid().is_none() {
            set_meta(&mut obj, "uid", Value::String(uuid::Uuid::new_v4().to_string()));
        }
        set_meta(&mut obj, "resourceVersion", Value::String(rv));
        st.objects.insert(r, obj.clone());
        obj
    }

    pub fn fail(&self, rule: FailureRule) {
        self.lock().failures.push(rule);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    pub fn contains(&self, r: &TypedRef) -> bool {
        self.lock().objects.contains_key(r)
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored object of a kind, sorted by namespace and name.
    pub fn all_of(&self, kind: &str) -> Vec<Document> {
        let st = self.lock();
        let mut out: Vec<(TypedRef, Document)> =
            st.objects.iter().filter(|(r, _)| r.kind == kind).map(|(r, o)| (r.clone(), o.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.into_iter().map(|(_, o)| o).collect()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, r: &TypedRef) -> Result<Document, StoreError> {
        let st = self.lock();
        if let Some(e) = st.injected(Op::Get, r) {
            return Err(e);
        }
        st.objects.get(r).cloned().ok_or_else(|| StoreError::NotFound(r.to_string()))
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Document>, StoreError> {
        let st = self.lock();
        let mut out: Vec<(&TypedRef, &Document)> = st
            .objects
            .iter()
            .filter(|(r, _)| r.api_version == api_version && r.kind == kind)
            .filter(|(r, _)| namespace.map(|ns| r.namespace.as_deref() == Some(ns)).unwrap_or(true))
            .filter(|(_, o)| {
                let have = o.labels();
                labels.iter().all(|(k, v)| have.get(k) == Some(v))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        Ok(out.into_iter().map(|(_, o)| o.clone()).collect())
    }

    async fn create(&self, obj: &Document) -> Result<Document, StoreError> {
        let r = self.validate(obj)?;
        let mut st = self.lock();
        if let Some(e) = st.injected(Op::Create, &r) {
            return Err(e);
        }
        if st.objects.contains_key(&r) {
            return Err(StoreError::AlreadyExists(r.to_string()));
        }
        let mut stored = obj.clone();
        let rv = st.bump();
        set_meta(&mut stored, "uid", Value::String(uuid::Uuid::new_v4().to_string()));
        set_meta(&mut stored, "resourceVersion", Value::String(rv));
        set_meta(&mut stored, "creationTimestamp", Value::String(now()));
        if let Some(meta) = stored.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("deletionTimestamp");
        }
        debug!(object = %r, "memory store: create");
        st.objects.insert(r.clone(), stored.clone());
        st.mutations.push(Mutation::Create(r));
        Ok(stored)
    }

    async fn update(&self, obj: &Document) -> Result<Document, StoreError> {
        let r = self.validate(obj)?;
        let mut st = self.lock();
        if let Some(e) = st.injected(Op::Update, &r) {
            return Err(e);
        }
        let current = st.objects.get(&r).cloned().ok_or_else(|| StoreError::NotFound(r.to_string()))?;
        if let Some(rv) = obj.resource_version() {
            if Some(rv) != current.resource_version() {
                return Err(StoreError::Conflict(format!("{}: resourceVersion {} is stale", r, rv)));
            }
        }
        let mut next = obj.clone();
        for key in ["uid", "creationTimestamp", "deletionTimestamp"] {
            match current.get("metadata").and_then(|m| m.get(key)) {
                Some(v) => set_meta(&mut next, key, v.clone()),
                None => {
                    if let Some(meta) = next.get_mut("metadata").and_then(Value::as_object_mut) {
                        meta.remove(key);
                    }
                }
            }
        }
        if let Some(obj_map) = next.as_object_mut() {
            match current.get("status") {
                Some(s) => {
                    obj_map.insert("status".into(), s.clone());
                }
                None => {
                    obj_map.remove("status");
                }
            }
        }
        let rv = st.bump();
        set_meta(&mut next, "resourceVersion", Value::String(rv));
        st.mutations.push(Mutation::Update(r.clone()));
        if next.is_deleting() && next.finalizers().is_empty() {
            debug!(object = %r, "memory store: last finalizer removed; deleting");
            st.objects.remove(&r);
        } else {
            st.objects.insert(r, next.clone());
        }
        Ok(next)
    }

    async fn update_status(&self, obj: &Document) -> Result<Document, StoreError> {
        let r = self.validate(obj)?;
        let mut st = self.lock();
        if let Some(e) = st.injected(Op::UpdateStatus, &r) {
            return Err(e);
        }
        let mut next = st.objects.get(&r).cloned().ok_or_else(|| StoreError::NotFound(r.to_string()))?;
        if let Some(rv) = obj.resource_version() {
            if Some(rv) != next.resource_version() {
                return Err(StoreError::Conflict(format!("{}: resourceVersion {} is stale", r, rv)));
            }
        }
        if let Some(obj_map) = next.as_object_mut() {
            match obj.get("status") {
                Some(s) => {
                    obj_map.insert("status".into(), s.clone());
                }
                None => {
                    obj_map.remove("status");
                }
            }
        }
        let rv = st.bump();
        set_meta(&mut next, "resourceVersion", Value::String(rv));
        st.objects.insert(r.clone(), next.clone());
        st.mutations.push(Mutation::UpdateStatus(r));
        Ok(next)
    }

    async fn dry_run_apply(&self, obj: &Document) -> Result<(), StoreError> {
        let r = self.validate(obj)?;
        match self.lock().injected(Op::DryRun, &r) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn delete(&self, r: &TypedRef) -> Result<(), StoreError> {
        let mut st = self.lock();
        if let Some(e) = st.injected(Op::Delete, r) {
            return Err(e);
        }
        let current = st.objects.get(r).cloned().ok_or_else(|| StoreError::NotFound(r.to_string()))?;
        st.mutations.push(Mutation::Delete(r.clone()));
        if current.finalizers().is_empty() {
            st.objects.remove(r);
            return Ok(());
        }
        if !current.is_deleting() {
            let mut next = current;
            let rv = st.bump();
            set_meta(&mut next, "deletionTimestamp", Value::String(now()));
            set_meta(&mut next, "resourceVersion", Value::String(rv));
            st.objects.insert(r.clone(), next);
        }
        Ok(())
    }
}

/// Recorder that keeps every event in memory.
#[derive(Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<(TypedRef, Event)>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(TypedRef, Event)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn warnings(&self) -> Vec<Event> {
        self.events().into_iter().filter(|(_, e)| e.type_ == EventType::Warning).map(|(_, e)| e).collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(&self, object: &TypedRef, event: Event) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push((object.clone(), event));
    }
}
