//! Structural checks on compositions.
//!
//! Validation errors are not retryable: the composition has to be edited before
//! anything can be composed from it.

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::transform::ValueType;
use crate::types::{Composition, CompositionMode, PatchType, Transform, TransformType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("compositeTypeRef is not set")]
    MissingCompositeTypeRef,
    #[error("composition in Pipeline mode has no pipeline steps")]
    EmptyPipeline,
    #[error("duplicate resource template name {0:?}")]
    DuplicateTemplateName(String),
    #[error("{template}: patch {index}: fromFieldPath is required")]
    MissingFromFieldPath { template: String, index: usize },
    #[error("{template}: patch {index}: patchSetName is required")]
    MissingPatchSetName { template: String, index: usize },
    #[error("{template}: patch {index}: undefined patch set {name:?}")]
    UndefinedPatchSet { template: String, index: usize, name: String },
    #[error("patch set {set:?}: patch {index} refers to another patch set; nesting is not allowed")]
    NestedPatchSet { set: String, index: usize },
    #[error("patch set {set:?}: patch {index}: fromFieldPath is required")]
    MissingPatchSetFromFieldPath { set: String, index: usize },
    #[error("{template}: patch {patch}: transform {index}: {problem}")]
    InvalidTransform { template: String, patch: usize, index: usize, problem: String },
}

/// Checks everything composing from `c` depends on. Stops at the first problem.
pub fn validate(c: &Composition) -> Result<(), ValidationError> {
    let spec = &c.spec;
    if !spec.composite_type_ref.is_set() {
        return Err(ValidationError::MissingCompositeTypeRef);
    }
    if spec.mode == CompositionMode::Pipeline {
        if spec.pipeline.is_empty() {
            return Err(ValidationError::EmptyPipeline);
        }
        return Ok(());
    }

    let mut sets = FxHashSet::default();
    for set in &spec.patch_sets {
        for (index, p) in set.patches.iter().enumerate() {
            match p.type_ {
                PatchType::PatchSet => return Err(ValidationError::NestedPatchSet { set: set.name.clone(), index }),
                _ if missing(&p.from_field_path) => {
                    return Err(ValidationError::MissingPatchSetFromFieldPath { set: set.name.clone(), index })
                }
                _ => {}
            }
        }
        sets.insert(set.name.as_str());
    }

    // Unnamed templates are allowed; they switch association to positional mode.
    let mut names = FxHashSet::default();
    for (i, t) in spec.resources.iter().enumerate() {
        let template = t.display_name(i);
        if let Some(n) = t.named() {
            if !names.insert(n) {
                return Err(ValidationError::DuplicateTemplateName(n.to_string()));
            }
        }
        for (index, p) in t.patches.iter().enumerate() {
            match p.type_ {
                PatchType::PatchSet => {
                    let name = p.patch_set_name.as_deref().filter(|n| !n.is_empty());
                    let Some(name) = name else {
                        return Err(ValidationError::MissingPatchSetName { template, index });
                    };
                    if !sets.contains(name) {
                        return Err(ValidationError::UndefinedPatchSet { template, index, name: name.to_string() });
                    }
                }
                PatchType::FromCompositeFieldPath | PatchType::ToCompositeFieldPath => {
                    if missing(&p.from_field_path) {
                        return Err(ValidationError::MissingFromFieldPath { template, index });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Transform problems that would otherwise only show up when a patch is applied.
pub fn lint_transforms(c: &Composition) -> Vec<ValidationError> {
    let mut out = Vec::new();
    for (i, t) in c.spec.resources.iter().enumerate() {
        for (patch, p) in t.patches.iter().enumerate() {
            for (index, tr) in p.transforms.iter().enumerate() {
                if let Some(problem) = transform_problem(tr) {
                    out.push(ValidationError::InvalidTransform { template: t.display_name(i), patch, index, problem });
                }
            }
        }
    }
    out
}

fn transform_problem(t: &Transform) -> Option<String> {
    let present = match t.type_ {
        TransformType::Math => t.math.is_some(),
        TransformType::Map => t.map.is_some(),
        TransformType::String => t.string.is_some(),
        TransformType::Convert => t.convert.is_some(),
        TransformType::Unknown => return Some("unknown transform type".into()),
    };
    if !present {
        return Some(format!("{} configuration is missing", t.type_.as_str()));
    }
    if let Some(m) = &t.math {
        if m.multiply.is_none() {
            return Some("math multiply is not set".into());
        }
    }
    if let Some(c) = &t.convert {
        for ty in c.input_type.iter().chain(std::iter::once(&c.output_type)) {
            if ty.parse::<ValueType>().is_err() {
                return Some(format!("unsupported convert type {:?}", ty));
            }
        }
    }
    None
}

fn missing(path: &Option<String>) -> bool {
    path.as_deref().map(str::is_empty).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComposedTemplate, Patch, PatchSet, TypeReference};

    fn composition(resources: Vec<ComposedTemplate>, sets: Vec<PatchSet>) -> Composition {
        let mut c = Composition::default();
        c.spec.composite_type_ref = TypeReference { api_version: "example.org/v1".into(), kind: "XBucket".into() };
        c.spec.resources = resources;
        c.spec.patch_sets = sets;
        c
    }

    fn named(name: &str, patches: Vec<Patch>) -> ComposedTemplate {
        ComposedTemplate { name: Some(name.into()), patches, ..Default::default() }
    }

    fn set_ref(name: &str) -> Patch {
        Patch { type_: PatchType::PatchSet, patch_set_name: Some(name.into()), ..Default::default() }
    }

    #[test]
    fn accepts_a_well_formed_composition() {
        let c = composition(
            vec![named("a", vec![set_ref("common"), Patch::from_composite("spec.x", "spec.y")]), ComposedTemplate::default()],
            vec![PatchSet { name: "common".into(), patches: vec![Patch::from_composite("spec.region", "spec.region")] }],
        );
        assert_eq!(validate(&c), Ok(()));
    }

    #[test]
    fn rejects_structural_problems() {
        let c = composition(vec![named("a", vec![]), named("a", vec![])], vec![]);
        assert_eq!(validate(&c), Err(ValidationError::DuplicateTemplateName("a".into())));

        let c = composition(vec![named("a", vec![set_ref("nope")])], vec![]);
        assert!(matches!(validate(&c), Err(ValidationError::UndefinedPatchSet { .. })));

        let c = composition(vec![named("a", vec![Patch::default()])], vec![]);
        assert_eq!(validate(&c), Err(ValidationError::MissingFromFieldPath { template: "a".into(), index: 0 }));

        let c = composition(vec![], vec![PatchSet { name: "s".into(), patches: vec![set_ref("s")] }]);
        assert_eq!(validate(&c), Err(ValidationError::NestedPatchSet { set: "s".into(), index: 0 }));

        let mut c = composition(vec![], vec![]);
        c.spec.composite_type_ref = TypeReference::default();
        assert_eq!(validate(&c), Err(ValidationError::MissingCompositeTypeRef));
    }

    #[test]
    fn lint_reports_transform_configuration() {
        let mut empty_math = Transform::math(1);
        empty_math.math = None;
        let c = composition(
            vec![named(
                "a",
                vec![Patch::from_composite("spec.x", "spec.y").with_transform(empty_math).with_transform(Transform::convert("duration"))],
            )],
            vec![],
        );
        assert_eq!(validate(&c), Ok(()));
        let problems = lint_transforms(&c);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].to_string().contains("math configuration is missing"));
        assert!(problems[1].to_string().contains("\"duration\""));
    }
}
