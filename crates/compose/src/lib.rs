//! Conflux composition engine.
//!
//! Turns a composite resource and a composition into composed resources: patch sets are
//! inlined, templates are paired with what earlier passes created, each template is
//! rendered through its patches and transforms, and the results are applied and observed.

#![forbid(unsafe_code)]

pub mod associate;
pub mod composer;
pub mod connection;
pub mod function;
pub mod names;
pub mod patch;
pub mod patchset;
pub mod readiness;
pub mod render;
pub mod transform;
pub mod types;
pub mod validate;

pub use associate::{associate, Associated, Association, AssociationMode};
pub use composer::{ComposedOutcome, Composer, ComposerOptions, CompositionResult};
pub use function::{FunctionRunner, PipelineOutput, RunFunctionRequest, RunFunctionResponse, Severity, State};
pub use patchset::inline_patch_sets;
pub use types::{ComposedTemplate, COMPOSITION_API_VERSION, COMPOSITION_KIND, CompositeResourceDefinition, Composition, CompositionMode, Patch, PatchType, Transform};
pub use validate::{lint_transforms, validate, ValidationError};
