//! Conflux apply: create-or-update against a resource store, dry-run, and minimal diffs.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use conflux_core::fieldpath;
use conflux_core::meta::{ObjectExt, TypedRef};
use conflux_core::Document;
use conflux_store::ResourceStore;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

fn max_yaml_bytes() -> usize {
    std::env::var("CONFLUX_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

fn max_yaml_nodes() -> usize {
    std::env::var("CONFLUX_MAX_YAML_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    // Keep a running counter and bail early when exceeding max
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for (_k, vv) in map.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// Parse a (possibly multi-document) YAML stream into JSON documents, enforcing size budgets.
/// Empty documents are skipped.
pub fn parse_manifests(yaml: &str) -> Result<Vec<Document>> {
    if yaml.len() > max_yaml_bytes() {
        return Err(anyhow!("YAML payload too large (>{} bytes)", max_yaml_bytes()));
    }
    let mut out = Vec::new();
    for (i, de) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let val = serde_yaml::Value::deserialize(de).with_context(|| format!("parsing YAML document {}", i))?;
        if val.is_null() {
            continue;
        }
        let json = serde_json::to_value(val).context("converting YAML to JSON")?;
        if json_node_budget_exceeded(&json, max_yaml_nodes()) {
            return Err(anyhow!("YAML document {} too complex (>{} nodes)", i, max_yaml_nodes()));
        }
        if json.get("apiVersion").and_then(|v| v.as_str()).is_none() {
            return Err(anyhow!("YAML document {} missing apiVersion", i));
        }
        if json.get("kind").and_then(|v| v.as_str()).is_none() {
            return Err(anyhow!("YAML document {} missing kind", i));
        }
        out.push(json);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

/// Drop server-populated fields that never take part in a diff.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
            obj.remove("resourceVersion");
            obj.remove("generation");
            obj.remove("creationTimestamp");
        }
    }
    // Status is written through its own path; ignore it during diffs
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}

pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, adds: &mut usize, ups: &mut usize, rems: &mut usize) {
        use serde_json::Value as V;
        match (a, b) {
            (V::Object(ao), V::Object(bo)) => {
                for (k, av) in ao.iter() {
                    if let Some(bv) = bo.get(k) {
                        if av == bv { continue; }
                        walk(av, bv, adds, ups, rems);
                    } else {
                        *adds += 1;
                    }
                }
                for (k, _bv) in bo.iter() {
                    if !ao.contains_key(k) { *rems += 1; }
                }
            }
            (V::Array(aa), V::Array(bb)) => {
                for (x, y) in aa.iter().zip(bb.iter()) { if x != y { *ups += 1; } }
                if aa.len() > bb.len() { *adds += aa.len() - bb.len(); }
                if bb.len() > aa.len() { *rems += bb.len() - aa.len(); }
            }
            // Scalars differ or type differs
            (av, bv) => { if av != bv { *ups += 1; } }
        }
    }
    let mut adds = 0usize; let mut ups = 0usize; let mut rems = 0usize;
    walk(target, base, &mut adds, &mut ups, &mut rems);
    DiffSummary { adds, updates: ups, removes: rems }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ApplyOutcome {
    fn label(self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Applied {
    pub outcome: ApplyOutcome,
    /// The object as stored after the call.
    pub object: Document,
    pub summary: DiffSummary,
}

/// Create `desired` if absent, otherwise merge it over the live object and update when
/// something changed. Fields present only on the live object are kept.
pub async fn apply(store: &dyn ResourceStore, desired: &Document) -> Result<Applied> {
    let t0 = std::time::Instant::now();
    let r = TypedRef::of(desired);
    let live = store.get_opt(&r).await.with_context(|| format!("cannot get {}", r))?;
    let res = match live {
        None => {
            let object = store.create(desired).await.with_context(|| format!("cannot create {}", r))?;
            Applied { outcome: ApplyOutcome::Created, object, summary: DiffSummary { adds: 1, ..Default::default() } }
        }
        Some(live) => {
            let mut merged = live.clone();
            fieldpath::merge(&mut merged, desired);
            let changes = diff_summary(&strip_noisy(merged.clone()), &strip_noisy(live.clone()));
            if changes.is_empty() {
                debug!(object = %r, "apply: no changes");
                Applied { outcome: ApplyOutcome::Unchanged, object: live, summary: changes }
            } else {
                let object = store.update(&merged).await.with_context(|| format!("cannot update {}", r))?;
                Applied { outcome: ApplyOutcome::Updated, object, summary: changes }
            }
        }
    };
    histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    counter!("composed_apply_total", 1u64, "result" => res.outcome.label());
    Ok(res)
}

/// Ask the store to validate `desired` without persisting it.
pub async fn dry_run(store: &dyn ResourceStore, desired: &Document) -> Result<()> {
    store
        .dry_run_apply(desired)
        .await
        .with_context(|| format!("dry-run rejected {} {}", desired.kind(), desired.name()))
}
