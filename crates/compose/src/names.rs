//! Generated object names: `{prefix}-{5 hex chars}`, checked against the store.

use anyhow::{bail, Context, Result};
use conflux_core::meta::TypedRef;
use conflux_store::ResourceStore;
use rustc_hash::FxHashSet;
use tracing::debug;

pub const SUFFIX_LEN: usize = 5;
pub const DEFAULT_ATTEMPTS: usize = 10;

pub fn random_suffix() -> String {
    let mut s = uuid::Uuid::new_v4().simple().to_string();
    s.truncate(SUFFIX_LEN);
    s
}

/// Draw names for `template` (whose name is ignored) until one is free in the store and
/// not in `taken`. The chosen name is added to `taken`.
pub async fn generate_name(
    store: &dyn ResourceStore,
    template: &TypedRef,
    prefix: &str,
    taken: &mut FxHashSet<String>,
    attempts: usize,
) -> Result<String> {
    for _ in 0..attempts.max(1) {
        let candidate = format!("{}-{}", prefix, random_suffix());
        if taken.contains(&candidate) {
            continue;
        }
        let probe = TypedRef { name: candidate.clone(), ..template.clone() };
        if store.get_opt(&probe).await.with_context(|| format!("cannot check whether {} exists", probe))?.is_some() {
            debug!(name = %candidate, "generated name already in use");
            continue;
        }
        taken.insert(candidate.clone());
        return Ok(candidate);
    }
    bail!("cannot generate a unique name with prefix {:?} after {} attempts", prefix, attempts.max(1))
}
