//! Conflux core types: field paths, object metadata, conditions and errors.

#![forbid(unsafe_code)]

pub mod conditions;
pub mod connection;
pub mod error;
pub mod event;
pub mod fieldpath;
pub mod meta;
pub mod xr;

/// Semi-structured document: every resource handled by the engine.
pub type Document = serde_json::Value;

/// Annotation recording which composition template produced a composed resource.
pub const ANNOTATION_RESOURCE_NAME: &str = "conflux.dev/composition-resource-name";
pub const LABEL_COMPOSITE: &str = "conflux.dev/composite";
pub const LABEL_CLAIM_NAME: &str = "conflux.dev/claim-name";
pub const LABEL_CLAIM_NAMESPACE: &str = "conflux.dev/claim-namespace";

pub const FINALIZER_COMPOSITE: &str = "composite.conflux.dev";
pub const FINALIZER_CLAIM: &str = "finalizer.conflux.dev";

pub mod prelude {
    pub use super::conditions::{Condition, ConditionStatus};
    pub use super::connection::ConnectionDetails;
    pub use super::error::StoreError;
    pub use super::event::{Event, EventRecorder, EventType};
    pub use super::meta::{ClaimRef, ObjectExt, OwnerReference, SecretRef, TypedRef};
    pub use super::xr::XrExt;
    pub use super::Document;
}
