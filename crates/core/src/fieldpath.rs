//! Field paths into semi-structured documents.
//!
//! A path is a dotted sequence of segments, each either a field name or a bracketed
//! index/key: `spec.containers[0].name`, `metadata.labels[app.kubernetes.io/name]`,
//! `metadata.annotations['example.org/owner']`.

use serde_json::{Map, Value};
use thiserror::Error;

/// Arrays are padded with nulls when writing past their end, but never by more than this.
const MAX_ARRAY_PAD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldPathError {
    #[error("{path}: no such field")]
    NotFound { path: String },
    #[error("{path}: expected {expected} at segment {segment}, found {found}")]
    TypeMismatch { path: String, segment: usize, expected: &'static str, found: &'static str },
    #[error("invalid field path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
}

impl FieldPathError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FieldPathError::NotFound { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// Split a path into segments.
pub fn parse(path: &str) -> Result<Vec<Segment>, FieldPathError> {
    let invalid = |reason: &str| FieldPathError::InvalidPath { path: path.to_string(), reason: reason.to_string() };
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    let mut out = Vec::new();
    let mut field = String::new();
    let mut after_bracket = false;
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if field.is_empty() {
                    if !after_bracket {
                        return Err(invalid("empty field name"));
                    }
                } else {
                    out.push(Segment::Field(std::mem::take(&mut field)));
                }
                if chars.peek().is_none() {
                    return Err(invalid("trailing '.'"));
                }
                after_bracket = false;
            }
            '[' => {
                if !field.is_empty() {
                    out.push(Segment::Field(std::mem::take(&mut field)));
                }
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(invalid("unterminated '['"));
                }
                out.push(bracket_segment(&inner).ok_or_else(|| invalid("empty brackets"))?);
                match chars.peek() {
                    None | Some('.') | Some('[') => {}
                    Some(_) => return Err(invalid("expected '.' or '[' after ']'")),
                }
                after_bracket = true;
            }
            ']' => return Err(invalid("unexpected ']'")),
            c => field.push(c),
        }
    }
    if !field.is_empty() {
        out.push(Segment::Field(field));
    }
    Ok(out)
}

fn bracket_segment(inner: &str) -> Option<Segment> {
    let inner = inner.trim();
    if inner.is_empty() {
        return None;
    }
    for q in ['\'', '"'] {
        if inner.len() >= 2 && inner.starts_with(q) && inner.ends_with(q) {
            return Some(Segment::Field(inner[1..inner.len() - 1].to_string()));
        }
    }
    if inner.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = inner.parse::<usize>() {
            return Some(Segment::Index(n));
        }
    }
    Some(Segment::Field(inner.to_string()))
}

pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float64",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read the value at `path`. Null intermediates count as missing.
pub fn get<'a>(doc: &'a Value, path: &str) -> Result<&'a Value, FieldPathError> {
    let segments = parse(path)?;
    let not_found = || FieldPathError::NotFound { path: path.to_string() };
    let mut cur = doc;
    for (i, seg) in segments.iter().enumerate() {
        cur = match (seg, cur) {
            (Segment::Field(f), Value::Object(m)) => m.get(f).ok_or_else(not_found)?,
            (Segment::Index(n), Value::Array(a)) => a.get(*n).ok_or_else(not_found)?,
            (Segment::Index(n), Value::Object(m)) => m.get(&n.to_string()).ok_or_else(not_found)?,
            (_, Value::Null) => return Err(not_found()),
            (Segment::Field(_), other) => {
                return Err(FieldPathError::TypeMismatch { path: path.to_string(), segment: i, expected: "object", found: type_name(other) })
            }
            (Segment::Index(_), other) => {
                return Err(FieldPathError::TypeMismatch { path: path.to_string(), segment: i, expected: "array", found: type_name(other) })
            }
        };
    }
    Ok(cur)
}

/// Optional read: `Ok(None)` when the path is absent.
pub fn get_opt<'a>(doc: &'a Value, path: &str) -> Result<Option<&'a Value>, FieldPathError> {
    match get(doc, path) {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn get_string<'a>(doc: &'a Value, path: &str) -> Result<&'a str, FieldPathError> {
    let v = get(doc, path)?;
    v.as_str().ok_or_else(|| FieldPathError::TypeMismatch {
        path: path.to_string(),
        segment: 0,
        expected: "string",
        found: type_name(v),
    })
}

pub fn get_i64(doc: &Value, path: &str) -> Result<i64, FieldPathError> {
    let v = get(doc, path)?;
    v.as_i64().ok_or_else(|| FieldPathError::TypeMismatch {
        path: path.to_string(),
        segment: 0,
        expected: "int",
        found: type_name(v),
    })
}

/// Write `value` at `path`, creating intermediate objects and arrays as needed.
pub fn set(doc: &mut Value, path: &str, value: Value) -> Result<(), FieldPathError> {
    let segments = parse(path)?;
    set_segments(doc, &segments, 0, value, path)
}

fn set_segments(cur: &mut Value, segments: &[Segment], depth: usize, value: Value, path: &str) -> Result<(), FieldPathError> {
    let Some((first, rest)) = segments.split_first() else {
        *cur = value;
        return Ok(());
    };
    if cur.is_null() {
        *cur = match first {
            Segment::Field(_) => Value::Object(Map::new()),
            Segment::Index(_) => Value::Array(Vec::new()),
        };
    }
    let next = match (first, cur) {
        (Segment::Field(f), Value::Object(m)) => m.entry(f.clone()).or_insert(Value::Null),
        (Segment::Index(n), Value::Object(m)) => m.entry(n.to_string()).or_insert(Value::Null),
        (Segment::Index(n), Value::Array(a)) => {
            if *n >= a.len() {
                if *n - a.len() > MAX_ARRAY_PAD {
                    return Err(FieldPathError::InvalidPath { path: path.to_string(), reason: format!("index {} too far past end of array", n) });
                }
                a.resize(*n + 1, Value::Null);
            }
            &mut a[*n]
        }
        (Segment::Field(_), other) => {
            return Err(FieldPathError::TypeMismatch { path: path.to_string(), segment: depth, expected: "object", found: type_name(other) })
        }
        (Segment::Index(_), other) => {
            return Err(FieldPathError::TypeMismatch { path: path.to_string(), segment: depth, expected: "array", found: type_name(other) })
        }
    };
    set_segments(next, rest, depth + 1, value, path)
}

/// Remove the value at `path`. Missing paths are not an error.
pub fn delete(doc: &mut Value, path: &str) -> Result<(), FieldPathError> {
    let segments = parse(path)?;
    let Some((last, parents)) = segments.split_last() else { return Ok(()) };
    let mut cur = doc;
    for seg in parents {
        let next = match (seg, cur) {
            (Segment::Field(f), Value::Object(m)) => m.get_mut(f),
            (Segment::Index(n), Value::Array(a)) => a.get_mut(*n),
            _ => None,
        };
        match next {
            Some(v) => cur = v,
            None => return Ok(()),
        }
    }
    match (last, cur) {
        (Segment::Field(f), Value::Object(m)) => {
            m.remove(f);
        }
        (Segment::Index(n), Value::Array(a)) if *n < a.len() => {
            a.remove(*n);
        }
        _ => {}
    }
    Ok(())
}

/// Deep-merge `src` into `dst`: objects merge key by key, everything else is replaced.
pub fn merge(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Object(d), Value::Object(s)) => {
            for (k, sv) in s {
                match d.get_mut(k) {
                    Some(dv) => merge(dv, sv),
                    None => {
                        d.insert(k.clone(), sv.clone());
                    }
                }
            }
        }
        (d, s) => *d = s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fields_indexes_and_keys() {
        let segs = parse("spec.containers[0].env['a.b'][key.with/slash]").unwrap();
        assert_eq!(
            segs,
            vec![
                Segment::Field("spec".into()),
                Segment::Field("containers".into()),
                Segment::Index(0),
                Segment::Field("env".into()),
                Segment::Field("a.b".into()),
                Segment::Field("key.with/slash".into()),
            ]
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        for p in ["", "a..b", ".a", "a.", "a[0", "a]b", "a[]", "a[0]b"] {
            assert!(matches!(parse(p), Err(FieldPathError::InvalidPath { .. })), "path {:?} should be invalid", p);
        }
    }

    #[test]
    fn get_reads_nested_values() {
        let doc = json!({"spec": {"forProvider": {"foo": "bar"}}});
        assert_eq!(get(&doc, "spec.forProvider.foo").unwrap(), &json!("bar"));
        assert!(get(&doc, "spec.forProvider.wrong").unwrap_err().is_not_found());
    }

    #[test]
    fn get_reports_out_of_range_and_type_mismatch() {
        let doc = json!({"items": [1, 2], "name": "x"});
        assert!(get(&doc, "items[5]").unwrap_err().is_not_found());
        assert!(matches!(get(&doc, "name.first"), Err(FieldPathError::TypeMismatch { expected: "object", .. })));
        assert!(matches!(get(&doc, "name[0]"), Err(FieldPathError::TypeMismatch { expected: "array", .. })));
    }

    #[test]
    fn set_creates_intermediates_and_pads_arrays() {
        let mut doc = json!({});
        set(&mut doc, "spec.items[2].name", json!("c")).unwrap();
        assert_eq!(doc, json!({"spec": {"items": [null, null, {"name": "c"}]}}));
        set(&mut doc, "metadata.labels[app.kubernetes.io/name]", json!("db")).unwrap();
        assert_eq!(get(&doc, "metadata.labels[app.kubernetes.io/name]").unwrap(), &json!("db"));
    }

    #[test]
    fn set_through_scalar_is_a_type_mismatch() {
        let mut doc = json!({"spec": "oops"});
        let err = set(&mut doc, "spec.size", json!(1)).unwrap_err();
        assert!(matches!(err, FieldPathError::TypeMismatch { segment: 1, .. }));
        assert_eq!(doc, json!({"spec": "oops"}));
    }

    #[test]
    fn delete_and_merge() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        delete(&mut doc, "a.b").unwrap();
        delete(&mut doc, "x.y").unwrap();
        assert_eq!(doc, json!({"a": {"c": 2}}));
        merge(&mut doc, &json!({"a": {"d": 3}, "e": [1]}));
        assert_eq!(doc, json!({"a": {"c": 2, "d": 3}, "e": [1]}));
    }
}
