use serde_json::Value;

use super::{as_integral, TransformError};
use crate::types::MathTransform;

pub(super) fn resolve(m: &MathTransform, input: &Value) -> Result<Value, TransformError> {
    let factor = m.multiply.ok_or(TransformError::MultiplierUnset)?;
    let value = as_integral(input).ok_or_else(|| TransformError::NotInteger { found: input.to_string() })?;
    let mut out = value.checked_mul(factor).ok_or(TransformError::Overflow { value, factor })?;
    if let Some(min) = m.clamp_min {
        out = out.max(min);
    }
    if let Some(max) = m.clamp_max {
        out = out.min(max);
    }
    Ok(Value::from(out))
}
