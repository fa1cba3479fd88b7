//! Conflux store: the resource store capability the engine depends on, plus in-process
//! collaborators (in-memory store, event recorder, keyed work queue, snapshot cache).

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use async_trait::async_trait;
use conflux_core::{error::StoreError, meta::TypedRef, Document};

mod cache;
mod memory;
mod queue;
mod registry;

pub use cache::SnapshotCache;
pub use memory::{FailureRule, MemoryRecorder, MemoryStore, Mutation, Op};
pub use queue::WorkQueue;
pub use registry::{Scope, TypeRegistry};

/// Capability set over the cluster datastore. Every call is a single blocking
/// interaction from the reconciler's point of view; cancellation is by dropping the future.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, r: &TypedRef) -> Result<Document, StoreError>;

    /// Objects of one kind, optionally restricted to a namespace and a label subset.
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn create(&self, obj: &Document) -> Result<Document, StoreError>;

    /// Replace everything but `status`.
    async fn update(&self, obj: &Document) -> Result<Document, StoreError>;

    /// Replace only `status`.
    async fn update_status(&self, obj: &Document) -> Result<Document, StoreError>;

    /// Validate `obj` as the store would on apply, without persisting it.
    async fn dry_run_apply(&self, obj: &Document) -> Result<(), StoreError>;

    async fn delete(&self, r: &TypedRef) -> Result<(), StoreError>;

    async fn get_opt(&self, r: &TypedRef) -> Result<Option<Document>, StoreError> {
        match self.get(r).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
