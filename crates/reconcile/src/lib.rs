//! Conflux reconcilers and the controller runtime that drives them.
//!
//! A [`CompositeReconciler`] keeps a composite's composed resources in line with its
//! composition; a [`ClaimReconciler`] binds namespaced claims to composites. Both are
//! level-triggered: each pass reads current state, converges one step and returns an
//! [`Action`] saying when to look again.

#![forbid(unsafe_code)]

use anyhow::Result;
use async_trait::async_trait;
use conflux_core::meta::TypedRef;

mod action;
pub mod claim;
pub mod composite;
pub mod config;
pub mod configurator;
pub mod controller;
pub mod selector;
mod status;

pub use action::Action;
pub use claim::{bind, BindError, ClaimReconciler};
pub use composite::CompositeReconciler;
pub use config::ReconcilerConfig;
pub use controller::Controller;
pub use selector::{
    CompositionCache, CompositionSelector, DefaultCompositionSelector, EnforcedCompositionSelector, LabelSelectorResolver, SelectorChain,
};

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Short label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Converge the object behind `key`. An error is retried with backoff.
    async fn reconcile(&self, key: &TypedRef) -> Result<Action>;
}
