//! Value transforms applied between a patch's source and destination.
//!
//! Each transform is a pure function of its configuration and input. A pipeline runs
//! transforms in declaration order and stops at the first failure.

mod convert;
mod format;
mod map;
mod math;
mod string;

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Transform, TransformType};

pub use convert::ValueType;
pub use format::sprintf;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("{type_} transform has no {type_} configuration")]
    MissingConfig { type_: &'static str },
    #[error("unknown transform type")]
    UnknownType,
    #[error("math transform: multiply is not set")]
    MultiplierUnset,
    #[error("math transform: input is not an integer (got {found})")]
    NotInteger { found: String },
    #[error("math transform: {value} * {factor} overflows")]
    Overflow { value: i64, factor: i64 },
    #[error("map transform: input is not a string (got {found})")]
    MapInputNotString { found: &'static str },
    #[error("map transform: key {key:?} is not found in map {table}")]
    KeyNotFound { key: String, table: String },
    #[error("string transform: input is not a string (got {found})")]
    StringInputNotString { found: &'static str },
    #[error("string transform: {0}")]
    StringConfig(String),
    #[error("string transform: regexp {pattern:?} has no match in {input:?}")]
    NoMatch { pattern: String, input: String },
    #[error("convert transform: unsupported type {0:?}")]
    UnsupportedType(String),
    #[error("convert transform: input is not of type {expected} (got {found})")]
    InputTypeMismatch { expected: ValueType, found: &'static str },
    #[error("convert transform: cannot convert {value:?} to {to}: {reason}")]
    Parse { value: String, to: ValueType, reason: String },
}

/// Apply a single transform to `input`.
pub fn resolve(t: &Transform, input: &Value) -> Result<Value, TransformError> {
    let missing = || TransformError::MissingConfig { type_: t.type_.as_str() };
    match t.type_ {
        TransformType::Math => math::resolve(t.math.as_ref().ok_or_else(missing)?, input),
        TransformType::Map => map::resolve(t.map.as_ref().ok_or_else(missing)?, input),
        TransformType::String => string::resolve(t.string.as_ref().ok_or_else(missing)?, input),
        TransformType::Convert => convert::resolve(t.convert.as_ref().ok_or_else(missing)?, input),
        TransformType::Unknown => Err(TransformError::UnknownType),
    }
}

/// Run `transforms` in order, feeding each output into the next.
pub fn resolve_all(transforms: &[Transform], input: Value) -> Result<Value> {
    transforms.iter().enumerate().try_fold(input, |value, (i, t)| {
        resolve(t, &value).with_context(|| format!("transform at index {} failed", i))
    })
}

/// Integer view of a JSON number, accepting floats with no fractional part.
pub(crate) fn as_integral(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?;
            (f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
        }),
        _ => None,
    }
}
