use std::fmt;
use std::str::FromStr;

use serde_json::{Number, Value};

use super::{as_integral, TransformError};
use crate::types::ConvertTransform;
use conflux_core::fieldpath::type_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Bool,
    Int,
    Float64,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float64 => "float64",
        })
    }
}

impl FromStr for ValueType {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ValueType::String),
            "bool" => Ok(ValueType::Bool),
            "int" | "int64" => Ok(ValueType::Int),
            "float64" => Ok(ValueType::Float64),
            other => Err(TransformError::UnsupportedType(other.to_string())),
        }
    }
}

/// Typed view of the input once it has been checked against the declared type.
enum Input<'a> {
    Str(&'a str),
    Bool(bool),
    Int(i64),
    Float(f64),
}

fn check_input(declared: ValueType, v: &Value) -> Result<Input<'_>, TransformError> {
    let mismatch = || TransformError::InputTypeMismatch { expected: declared, found: type_name(v) };
    match (declared, v) {
        (ValueType::String, Value::String(s)) => Ok(Input::Str(s)),
        (ValueType::Bool, Value::Bool(b)) => Ok(Input::Bool(*b)),
        (ValueType::Int, Value::Number(_)) => as_integral(v).map(Input::Int).ok_or_else(mismatch),
        (ValueType::Float64, Value::Number(n)) => n.as_f64().map(Input::Float).ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

fn float(f: f64, raw: &str) -> Result<Value, TransformError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| TransformError::Parse { value: raw.to_string(), to: ValueType::Float64, reason: "not a finite number".into() })
}

pub(super) fn resolve(c: &ConvertTransform, input: &Value) -> Result<Value, TransformError> {
    let from = c.input_type.as_deref().map(ValueType::from_str).transpose()?.unwrap_or(ValueType::String);
    let to: ValueType = c.output_type.parse()?;
    let typed = check_input(from, input)?;
    if from == to {
        return Ok(input.clone());
    }
    let parse_err = |value: &str, reason: String| TransformError::Parse { value: value.to_string(), to, reason };
    let out = match (typed, to) {
        (Input::Str(s), ValueType::Bool) => match s {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(parse_err(s, "expected true or false".into())),
        },
        (Input::Str(s), ValueType::Int) => Value::from(s.parse::<i64>().map_err(|e| parse_err(s, e.to_string()))?),
        (Input::Str(s), ValueType::Float64) => float(s.parse::<f64>().map_err(|e| parse_err(s, e.to_string()))?, s)?,
        (Input::Bool(b), ValueType::String) => Value::String(b.to_string()),
        (Input::Bool(b), ValueType::Int) => Value::from(i64::from(b)),
        (Input::Bool(b), ValueType::Float64) => float(if b { 1.0 } else { 0.0 }, &b.to_string())?,
        (Input::Int(i), ValueType::String) => Value::String(i.to_string()),
        (Input::Int(i), ValueType::Bool) => Value::Bool(i == 1),
        (Input::Int(i), ValueType::Float64) => float(i as f64, &i.to_string())?,
        (Input::Float(f), ValueType::String) => Value::String(f.to_string()),
        (Input::Float(f), ValueType::Bool) => Value::Bool(f == 1.0),
        // Truncates toward zero.
        (Input::Float(f), ValueType::Int) => Value::from(f as i64),
        (_, to) => return Err(TransformError::UnsupportedType(to.to_string())),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conv(from: &str, to: &str, v: Value) -> Result<Value, TransformError> {
        resolve(&ConvertTransform { input_type: Some(from.into()), output_type: to.into() }, &v)
    }

    #[test]
    fn self_conversion_is_identity() {
        for (t, v) in [("string", json!("x")), ("bool", json!(true)), ("int", json!(42)), ("float64", json!(1.5))] {
            assert_eq!(conv(t, t, v.clone()).unwrap(), v, "{}", t);
        }
    }

    #[test]
    fn input_type_defaults_to_string() {
        let c = ConvertTransform { input_type: None, output_type: "int".into() };
        assert_eq!(resolve(&c, &json!("12")).unwrap(), json!(12));
        let err = resolve(&c, &json!(12)).unwrap_err();
        assert_eq!(err.to_string(), "convert transform: input is not of type string (got int)");
    }

    #[test]
    fn string_conversions() {
        assert_eq!(conv("string", "bool", json!("true")).unwrap(), json!(true));
        assert!(conv("string", "bool", json!("yes")).is_err());
        assert_eq!(conv("string", "float64", json!("2.5")).unwrap(), json!(2.5));
        assert!(matches!(conv("string", "int", json!("abc")), Err(TransformError::Parse { .. })));
    }

    #[test]
    fn numeric_to_bool_requires_exactly_one() {
        assert_eq!(conv("int", "bool", json!(1)).unwrap(), json!(true));
        assert_eq!(conv("int", "bool", json!(2)).unwrap(), json!(false));
        assert_eq!(conv("float64", "bool", json!(1.0)).unwrap(), json!(true));
        assert_eq!(conv("float64", "bool", json!(0.5)).unwrap(), json!(false));
    }

    #[test]
    fn bool_and_number_conversions() {
        assert_eq!(conv("bool", "int", json!(true)).unwrap(), json!(1));
        assert_eq!(conv("bool", "float64", json!(false)).unwrap(), json!(0.0));
        assert_eq!(conv("bool", "string", json!(false)).unwrap(), json!("false"));
        assert_eq!(conv("int", "float64", json!(3)).unwrap(), json!(3.0));
        assert_eq!(conv("float64", "int", json!(3.9)).unwrap(), json!(3));
        assert_eq!(conv("float64", "string", json!(2.5)).unwrap(), json!("2.5"));
    }

    #[test]
    fn unsupported_types_are_named() {
        let err = conv("string", "duration", json!("1s")).unwrap_err();
        assert_eq!(err, TransformError::UnsupportedType("duration".into()));
        let err = conv("object", "string", json!({})).unwrap_err();
        assert_eq!(err, TransformError::UnsupportedType("object".into()));
    }
}
