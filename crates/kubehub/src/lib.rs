//! Conflux kubehub: the cluster-facing adapters.
//!
//! [`KubeStore`] implements the resource store over dynamic objects, [`KubeEventRecorder`]
//! publishes events, and [`watch_into_queue`] turns list+watch streams into work-queue keys.

#![forbid(unsafe_code)]

mod events;
mod store;
mod watch;

pub use events::KubeEventRecorder;
pub use store::{parse_kind_key, KubeStore};
pub use watch::{keys_for, watch_into_queue, Mapping};
