//! Applying patches between composite and composed documents.

use anyhow::{bail, Context, Result};
use conflux_core::fieldpath;
use serde_json::Value;

use crate::transform;
use crate::types::{Patch, PatchType};

/// Copy the value at the patch's `fromFieldPath` in `from`, transformed, to its
/// `toFieldPath` (default: the same path) in `to`. A missing or null source value
/// leaves `to` untouched.
pub fn apply(patch: &Patch, from: &Value, to: &mut Value) -> Result<()> {
    if patch.type_ == PatchType::PatchSet {
        bail!("patch set {:?} was not inlined before patching", patch.patch_set_name.as_deref().unwrap_or_default());
    }
    let Some(from_path) = patch.from_field_path.as_deref().filter(|p| !p.is_empty()) else {
        bail!("fromFieldPath is required");
    };
    let value = match fieldpath::get_opt(from, from_path).with_context(|| format!("cannot read {}", from_path))? {
        None | Some(Value::Null) => return Ok(()),
        Some(v) => v.clone(),
    };
    let value = transform::resolve_all(&patch.transforms, value)?;
    let to_path = patch.to_field_path.as_deref().filter(|p| !p.is_empty()).unwrap_or(from_path);
    fieldpath::set(to, to_path, value).with_context(|| format!("cannot set {}", to_path))
}

/// Apply the `FromCompositeFieldPath` patches, in order, from `composite` onto `composed`.
pub fn apply_from_composite(patches: &[Patch], composite: &Value, composed: &mut Value) -> Result<()> {
    for (i, p) in patches.iter().enumerate() {
        if p.type_ == PatchType::ToCompositeFieldPath {
            continue;
        }
        apply(p, composite, composed).with_context(|| format!("cannot apply patch {}", i))?;
    }
    Ok(())
}

/// Apply the `ToCompositeFieldPath` patches, in order, from an observed `composed` onto `composite`.
pub fn apply_to_composite(patches: &[Patch], composed: &Value, composite: &mut Value) -> Result<()> {
    for (i, p) in patches.iter().enumerate() {
        if p.type_ != PatchType::ToCompositeFieldPath {
            continue;
        }
        apply(p, composed, composite).with_context(|| format!("cannot apply patch {}", i))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transform;
    use serde_json::json;

    #[test]
    fn missing_source_is_skipped_silently() {
        let composite = json!({"spec": {}});
        let mut composed = json!({"spec": {"size": 1}});
        apply(&Patch::from_composite("spec.size", "spec.size"), &composite, &mut composed).unwrap();
        assert_eq!(composed, json!({"spec": {"size": 1}}));
    }

    #[test]
    fn copies_through_transforms_to_the_default_path() {
        let composite = json!({"spec": {"size": 10, "region": "eu"}});
        let mut composed = json!({});
        let patches = vec![
            Patch::from_composite("spec.size", "spec.forProvider.sizeGb").with_transform(Transform::math(2)),
            Patch { from_field_path: Some("spec.region".into()), ..Default::default() },
        ];
        apply_from_composite(&patches, &composite, &mut composed).unwrap();
        assert_eq!(composed, json!({"spec": {"forProvider": {"sizeGb": 20}, "region": "eu"}}));
    }

    #[test]
    fn transform_failures_name_the_patch_and_transform() {
        let composite = json!({"spec": {"size": "big"}});
        let mut composed = json!({});
        let patches = vec![Patch::from_composite("spec.size", "spec.size").with_transform(Transform::math(2))];
        let msg = format!("{:#}", apply_from_composite(&patches, &composite, &mut composed).unwrap_err());
        assert!(msg.starts_with("cannot apply patch 0: transform at index 0 failed"), "{}", msg);
    }

    #[test]
    fn unexpanded_patch_set_is_rejected() {
        let p = Patch { type_: PatchType::PatchSet, patch_set_name: Some("s".into()), ..Default::default() };
        assert!(apply(&p, &json!({}), &mut json!({})).is_err());
    }

    #[test]
    fn to_composite_patches_flow_back() {
        let observed = json!({"status": {"atProvider": {"arn": "arn:x"}}});
        let mut composite = json!({"status": {}});
        let patches = vec![
            Patch { type_: PatchType::ToCompositeFieldPath, ..Patch::from_composite("status.atProvider.arn", "status.arn") },
            Patch::from_composite("spec.ignored", "spec.ignored"),
        ];
        apply_to_composite(&patches, &observed, &mut composite).unwrap();
        assert_eq!(composite, json!({"status": {"arn": "arn:x"}}));
    }
}
