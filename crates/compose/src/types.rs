//! Composition and definition types, deserialized from their stored documents.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use conflux_core::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const COMPOSITION_API_VERSION: &str = "conflux.dev/v1";
pub const COMPOSITION_KIND: &str = "Composition";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeReference {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
}

impl TypeReference {
    pub fn is_set(&self) -> bool {
        !self.api_version.is_empty() && !self.kind.is_empty()
    }

    pub fn matches(&self, obj: &Value) -> bool {
        use conflux_core::meta::ObjectExt;
        obj.api_version() == self.api_version && obj.kind() == self.kind
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CompositionSpec,
}

impl Composition {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let name = doc.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default();
        serde_json::from_value(doc.clone()).with_context(|| format!("cannot parse composition {:?}", name))
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositionMode {
    #[default]
    Resources,
    Pipeline,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    #[serde(default)]
    pub composite_type_ref: TypeReference,
    #[serde(default)]
    pub mode: CompositionMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patch_sets: Vec<PatchSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ComposedTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<PipelineStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secrets_to_namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub name: String,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

/// Blueprint for one composed resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub base: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_details: Vec<ConnectionDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_checks: Vec<ReadinessCheck>,
}

impl ComposedTemplate {
    /// Label used in events and errors: the template name, else its position.
    pub fn display_name(&self, index: usize) -> String {
        match self.name.as_deref() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => format!("resources[{}]", index),
        }
    }

    pub fn named(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[default]
    FromCompositeFieldPath,
    ToCompositeFieldPath,
    PatchSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    #[serde(rename = "type", default)]
    pub type_: PatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_set_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<Transform>,
}

impl Patch {
    pub fn from_composite(from: &str, to: &str) -> Self {
        Self { from_field_path: Some(from.into()), to_field_path: Some(to.into()), ..Default::default() }
    }

    pub fn with_transform(mut self, t: Transform) -> Self {
        self.transforms.push(t);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformType {
    #[serde(rename = "math")]
    Math,
    #[serde(rename = "map")]
    Map,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "convert")]
    Convert,
    #[serde(other)]
    Unknown,
}

impl TransformType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformType::Math => "math",
            TransformType::Map => "map",
            TransformType::String => "string",
            TransformType::Convert => "convert",
            TransformType::Unknown => "unknown",
        }
    }
}

/// A transform: the discriminator plus the configuration for that discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(rename = "type")]
    pub type_: TransformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<MathTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<MapTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<StringTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert: Option<ConvertTransform>,
}

impl Transform {
    pub fn math(multiply: i64) -> Self {
        Self::bare(TransformType::Math, |t| t.math = Some(MathTransform { multiply: Some(multiply), ..Default::default() }))
    }

    pub fn map<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self::bare(TransformType::Map, |t| t.map = Some(MapTransform { pairs }))
    }

    pub fn format(fmt: &str) -> Self {
        Self::bare(TransformType::String, |t| t.string = Some(StringTransform { fmt: Some(fmt.into()), ..Default::default() }))
    }

    pub fn convert(to: &str) -> Self {
        Self::bare(TransformType::Convert, |t| t.convert = Some(ConvertTransform { input_type: None, output_type: to.into() }))
    }

    pub fn convert_from(from: &str, to: &str) -> Self {
        Self::bare(TransformType::Convert, |t| t.convert = Some(ConvertTransform { input_type: Some(from.into()), output_type: to.into() }))
    }

    fn bare(type_: TransformType, f: impl FnOnce(&mut Self)) -> Self {
        let mut t = Self { type_, math: None, map: None, string: None, convert: None };
        f(&mut t);
        t
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MathTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiply: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamp_min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamp_max: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapTransform {
    pub pairs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringTransformType {
    #[default]
    Format,
    Convert,
    TrimPrefix,
    TrimSuffix,
    Regexp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringConversion {
    ToUpper,
    ToLower,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringTransform {
    #[serde(rename = "type", default)]
    pub type_: StringTransformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert: Option<StringConversion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<RegexpSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexpSpec {
    #[serde(rename = "match")]
    pub match_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<usize>,
}

/// Type names are kept as written so an unknown one is reported when the transform runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(rename = "toType", alias = "outputType", default)]
    pub output_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionDetailType {
    FromConnectionSecretKey,
    FromFieldPath,
    FromValue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<ConnectionDetailType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_connection_secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ConnectionDetail {
    /// Declared type, or the one implied by whichever source field is set.
    pub fn effective_type(&self) -> Option<ConnectionDetailType> {
        self.type_.or_else(|| {
            if self.value.is_some() {
                Some(ConnectionDetailType::FromValue)
            } else if self.from_field_path.is_some() {
                Some(ConnectionDetailType::FromFieldPath)
            } else if self.from_connection_secret_key.is_some() {
                Some(ConnectionDetailType::FromConnectionSecretKey)
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessCheckType {
    None,
    NonEmpty,
    MatchString,
    MatchInteger,
    MatchCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConditionSpec {
    #[serde(rename = "type", default = "default_condition_type")]
    pub type_: String,
    #[serde(default = "default_condition_status")]
    pub status: String,
}

fn default_condition_type() -> String {
    conflux_core::conditions::TYPE_READY.to_string()
}

fn default_condition_status() -> String {
    "True".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessCheck {
    #[serde(rename = "type")]
    pub type_: ReadinessCheckType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_integer: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_condition: Option<MatchConditionSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionReference {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub step: String,
    pub function_ref: FunctionReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Names {
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionSpec {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub names: Names,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_names: Option<Names>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_composition_ref: Option<NameRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforced_composition_ref: Option<NameRef>,
}

/// The subset of a CompositeResourceDefinition that composition selection reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeResourceDefinition {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: DefinitionSpec,
}

impl CompositeResourceDefinition {
    pub fn from_document(doc: &Document) -> Result<Self> {
        serde_json::from_value(doc.clone()).context("cannot parse composite resource definition")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_composition_document() {
        let doc = json!({
            "apiVersion": "conflux.dev/v1",
            "kind": "Composition",
            "metadata": {"name": "buckets", "labels": {"provider": "aws"}},
            "spec": {
                "compositeTypeRef": {"apiVersion": "example.org/v1", "kind": "XBucket"},
                "patchSets": [{"name": "common", "patches": [{"fromFieldPath": "spec.region"}]}],
                "resources": [{
                    "name": "bucket",
                    "base": {"apiVersion": "s3.example.org/v1", "kind": "Bucket"},
                    "patches": [
                        {"type": "PatchSet", "patchSetName": "common"},
                        {"fromFieldPath": "spec.size", "toFieldPath": "spec.forProvider.size",
                         "transforms": [{"type": "math", "math": {"multiply": 2}},
                                        {"type": "convert", "convert": {"toType": "string"}}]}
                    ],
                    "readinessChecks": [{"type": "MatchString", "fieldPath": "status.phase", "matchString": "Ready"}]
                }]
            }
        });
        let c = Composition::from_document(&doc).unwrap();
        assert_eq!(c.name(), "buckets");
        assert_eq!(c.spec.mode, CompositionMode::Resources);
        let t = &c.spec.resources[0];
        assert_eq!(t.patches[0].type_, PatchType::PatchSet);
        assert_eq!(t.patches[1].type_, PatchType::FromCompositeFieldPath);
        assert_eq!(t.patches[1].transforms[1].convert.as_ref().unwrap().output_type, "string");
        assert_eq!(t.readiness_checks[0].type_, ReadinessCheckType::MatchString);
    }

    #[test]
    fn unknown_transform_types_parse_and_are_flagged() {
        let t: Transform = serde_json::from_value(json!({"type": "lookup"})).unwrap();
        assert_eq!(t.type_, TransformType::Unknown);
    }

    #[test]
    fn connection_detail_type_is_inferred() {
        let d = ConnectionDetail { from_connection_secret_key: Some("password".into()), ..Default::default() };
        assert_eq!(d.effective_type(), Some(ConnectionDetailType::FromConnectionSecretKey));
        let d = ConnectionDetail { name: Some("url".into()), value: Some("x".into()), ..Default::default() };
        assert_eq!(d.effective_type(), Some(ConnectionDetailType::FromValue));
    }
}
