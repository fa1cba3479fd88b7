use serde_json::Value;

use super::TransformError;
use crate::types::MapTransform;
use conflux_core::fieldpath::type_name;

/// Tables rendered into errors are cut at this many bytes.
const TABLE_PREVIEW: usize = 256;

pub(super) fn resolve(m: &MapTransform, input: &Value) -> Result<Value, TransformError> {
    let key = input.as_str().ok_or(TransformError::MapInputNotString { found: type_name(input) })?;
    match m.pairs.get(key) {
        Some(v) => Ok(Value::String(v.clone())),
        None => Err(TransformError::KeyNotFound { key: key.to_string(), table: preview(m) }),
    }
}

fn preview(m: &MapTransform) -> String {
    let mut s = serde_json::to_string(&m.pairs).unwrap_or_default();
    if s.len() > TABLE_PREVIEW {
        let mut cut = TABLE_PREVIEW;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}
