//! Patch set expansion.

use rustc_hash::FxHashMap;

use crate::types::{ComposedTemplate, Composition, PatchSet, PatchType};
use crate::validate::ValidationError;

/// Templates with every `PatchSet` reference replaced, in place, by the referenced set's
/// patches. The result is a working copy and is never written back to the composition.
pub fn inline_patch_sets(c: &Composition) -> Result<Vec<ComposedTemplate>, ValidationError> {
    let mut sets: FxHashMap<&str, &PatchSet> = FxHashMap::default();
    for set in &c.spec.patch_sets {
        if let Some(index) = set.patches.iter().position(|p| p.type_ == PatchType::PatchSet) {
            return Err(ValidationError::NestedPatchSet { set: set.name.clone(), index });
        }
        sets.insert(set.name.as_str(), set);
    }

    c.spec
        .resources
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut patches = Vec::with_capacity(t.patches.len());
            for (index, p) in t.patches.iter().enumerate() {
                if p.type_ != PatchType::PatchSet {
                    patches.push(p.clone());
                    continue;
                }
                let name = p
                    .patch_set_name
                    .as_deref()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| ValidationError::MissingPatchSetName { template: t.display_name(i), index })?;
                let set = sets.get(name).ok_or_else(|| ValidationError::UndefinedPatchSet {
                    template: t.display_name(i),
                    index,
                    name: name.to_string(),
                })?;
                patches.extend(set.patches.iter().cloned());
            }
            Ok(ComposedTemplate { patches, ..t.clone() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Patch;

    #[test]
    fn expands_sets_in_place_without_touching_the_composition() {
        let mut c = Composition::default();
        c.spec.patch_sets = vec![PatchSet {
            name: "common".into(),
            patches: vec![Patch::from_composite("spec.a", "spec.a"), Patch::from_composite("spec.b", "spec.b")],
        }];
        c.spec.resources = vec![ComposedTemplate {
            name: Some("r".into()),
            patches: vec![
                Patch::from_composite("spec.first", "spec.first"),
                Patch { type_: PatchType::PatchSet, patch_set_name: Some("common".into()), ..Default::default() },
                Patch::from_composite("spec.last", "spec.last"),
            ],
            ..Default::default()
        }];
        let before = c.clone();
        let out = inline_patch_sets(&c).unwrap();
        let froms: Vec<_> = out[0].patches.iter().map(|p| p.from_field_path.as_deref().unwrap()).collect();
        assert_eq!(froms, ["spec.first", "spec.a", "spec.b", "spec.last"]);
        assert!(out[0].patches.iter().all(|p| p.type_ != PatchType::PatchSet));
        assert_eq!(c, before);
    }

    #[test]
    fn undefined_set_is_an_error() {
        let mut c = Composition::default();
        c.spec.resources = vec![ComposedTemplate {
            patches: vec![Patch { type_: PatchType::PatchSet, patch_set_name: Some("missing".into()), ..Default::default() }],
            ..Default::default()
        }];
        let err = inline_patch_sets(&c).unwrap_err();
        assert_eq!(err.to_string(), "resources[0]: patch 0: undefined patch set \"missing\"");
    }
}
