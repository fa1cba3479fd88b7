use regex::Regex;
use serde_json::Value;

use super::format::sprintf;
use super::TransformError;
use crate::types::{StringConversion, StringTransform, StringTransformType};
use conflux_core::fieldpath::type_name;

pub(super) fn resolve(s: &StringTransform, input: &Value) -> Result<Value, TransformError> {
    let config = |what: &str| TransformError::StringConfig(format!("{} is not set", what));
    let text = || input.as_str().ok_or(TransformError::StringInputNotString { found: type_name(input) });
    let out = match s.type_ {
        StringTransformType::Format => sprintf(s.fmt.as_deref().ok_or_else(|| config("fmt"))?, input),
        StringTransformType::Convert => match s.convert.ok_or_else(|| config("convert"))? {
            StringConversion::ToUpper => text()?.to_uppercase(),
            StringConversion::ToLower => text()?.to_lowercase(),
        },
        StringTransformType::TrimPrefix => {
            let trim = s.trim.as_deref().ok_or_else(|| config("trim"))?;
            let text = text()?;
            text.strip_prefix(trim).unwrap_or(text).to_string()
        }
        StringTransformType::TrimSuffix => {
            let trim = s.trim.as_deref().ok_or_else(|| config("trim"))?;
            let text = text()?;
            text.strip_suffix(trim).unwrap_or(text).to_string()
        }
        StringTransformType::Regexp => {
            let spec = s.regexp.as_ref().ok_or_else(|| config("regexp"))?;
            let text = text()?;
            let re = Regex::new(&spec.match_).map_err(|e| TransformError::StringConfig(format!("invalid regexp {:?}: {}", spec.match_, e)))?;
            let caps = re.captures(text).ok_or_else(|| TransformError::NoMatch { pattern: spec.match_.clone(), input: text.to_string() })?;
            let group = spec.group.unwrap_or(0);
            caps.get(group)
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| TransformError::StringConfig(format!("regexp {:?} has no capture group {}", spec.match_, group)))?
        }
    };
    Ok(Value::String(out))
}
