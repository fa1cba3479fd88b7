//! Choosing a composition for a composite, and loading it.
//!
//! Selection runs as a chain. The enforced composition of the definition always wins,
//! then an explicit `spec.compositionRef`, then the definition's default (only when the
//! composite has no selector either), and finally the label selector.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use conflux_compose::types::{CompositeResourceDefinition, Composition, COMPOSITION_API_VERSION, COMPOSITION_KIND};
use conflux_core::meta::{ObjectExt, TypedRef};
use conflux_core::xr::XrExt;
use conflux_core::Document;
use conflux_store::{ResourceStore, SnapshotCache};
use tracing::debug;

#[async_trait]
pub trait CompositionSelector: Send + Sync {
    /// Set `spec.compositionRef` on `composite` when this strategy applies.
    async fn select(&self, composite: &mut Document) -> Result<()>;
}

/// Pins every composite of a definition to its enforced composition.
pub struct EnforcedCompositionSelector {
    definition: CompositeResourceDefinition,
}

impl EnforcedCompositionSelector {
    pub fn new(definition: CompositeResourceDefinition) -> Self {
        Self { definition }
    }
}

#[async_trait]
impl CompositionSelector for EnforcedCompositionSelector {
    async fn select(&self, composite: &mut Document) -> Result<()> {
        let Some(enforced) = &self.definition.spec.enforced_composition_ref else {
            return Ok(());
        };
        if composite.composition_ref().as_deref() != Some(enforced.name.as_str()) {
            debug!(composite = %composite.name(), composition = %enforced.name, "using enforced composition");
            composite.set_composition_ref(&enforced.name);
        }
        Ok(())
    }
}

pub struct DefaultCompositionSelector {
    definition: CompositeResourceDefinition,
}

impl DefaultCompositionSelector {
    pub fn new(definition: CompositeResourceDefinition) -> Self {
        Self { definition }
    }
}

#[async_trait]
impl CompositionSelector for DefaultCompositionSelector {
    async fn select(&self, composite: &mut Document) -> Result<()> {
        if composite.composition_ref().is_some() || composite.composition_selector().is_some() {
            return Ok(());
        }
        if let Some(default) = &self.definition.spec.default_composition_ref {
            debug!(composite = %composite.name(), composition = %default.name, "using default composition");
            composite.set_composition_ref(&default.name);
        }
        Ok(())
    }
}

/// Resolves `spec.compositionSelector` against the stored compositions. Among the
/// compatible matches the first by name is chosen so the choice is stable.
pub struct LabelSelectorResolver {
    store: Arc<dyn ResourceStore>,
}

impl LabelSelectorResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CompositionSelector for LabelSelectorResolver {
    async fn select(&self, composite: &mut Document) -> Result<()> {
        if composite.composition_ref().is_some() {
            return Ok(());
        }
        let labels: BTreeMap<String, String> = composite.composition_selector().unwrap_or_default();
        let docs = self
            .store
            .list(COMPOSITION_API_VERSION, COMPOSITION_KIND, None, &labels)
            .await
            .context("cannot list compositions")?;
        let mut names: Vec<String> = docs
            .iter()
            .filter_map(|d| Composition::from_document(d).ok())
            .filter(|c| c.spec.composite_type_ref.matches(composite))
            .map(|c| c.metadata.name)
            .collect();
        names.sort();
        let chosen = names.into_iter().next().ok_or_else(|| {
            anyhow!("no composition for {}/{} matches labels {:?}", composite.api_version(), composite.kind(), labels)
        })?;
        debug!(composite = %composite.name(), composition = %chosen, "selected composition by labels");
        composite.set_composition_ref(&chosen);
        Ok(())
    }
}

/// Runs each selector in turn.
pub struct SelectorChain {
    selectors: Vec<Box<dyn CompositionSelector>>,
}

impl SelectorChain {
    pub fn new(selectors: Vec<Box<dyn CompositionSelector>>) -> Self {
        Self { selectors }
    }

    /// Enforced, then default, then labels.
    pub fn standard(definition: CompositeResourceDefinition, store: Arc<dyn ResourceStore>) -> Self {
        Self::new(vec![
            Box::new(EnforcedCompositionSelector::new(definition.clone())),
            Box::new(DefaultCompositionSelector::new(definition)),
            Box::new(LabelSelectorResolver::new(store)),
        ])
    }
}

#[async_trait]
impl CompositionSelector for SelectorChain {
    async fn select(&self, composite: &mut Document) -> Result<()> {
        for s in &self.selectors {
            s.select(composite).await?;
        }
        Ok(())
    }
}

/// Parsed compositions keyed by `name@resourceVersion`, so an edit to a composition is
/// picked up on the next fetch.
pub struct CompositionCache {
    store: Arc<dyn ResourceStore>,
    cache: SnapshotCache<Composition>,
}

impl CompositionCache {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store, cache: SnapshotCache::new() }
    }

    pub async fn fetch(&self, name: &str) -> Result<Arc<Composition>> {
        let r = TypedRef::new(COMPOSITION_API_VERSION, COMPOSITION_KIND, name);
        let doc = self.store.get(&r).await.with_context(|| format!("cannot get composition {:?}", name))?;
        let key = format!("{}@{}", name, doc.resource_version().unwrap_or_default());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let parsed = Composition::from_document(&doc)?;
        self.cache.evict_prefix(&format!("{}@", name));
        Ok(self.cache.insert(&key, parsed))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
