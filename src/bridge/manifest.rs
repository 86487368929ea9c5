//! Property manifest sanitization.
//!
//! End-user input is filtered against a component kind's manifest before it
//! reaches the module. Sanitization never fails: unknown keys and values of
//! the wrong shape are dropped, and only the drop is logged.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use super::host_value::HostValue;
use crate::types::{
    format_number, parse_float_prefix, parse_int_prefix, to_int32, Alignment, Brush, ObjectSchema, Rgba,
    ValueKind,
};

static LENGTH_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d*\.\d+|\d+)(px|in|cm|mm)$").expect("length pattern"));

/// Keep only the manifest's keys, each sanitized against its kind.
///
/// A non-object input sanitizes to an empty object.
pub fn sanitize_props(props: &HostValue, manifest: &ObjectSchema) -> HostValue {
    let mut sanitized = IndexMap::with_capacity(manifest.len());
    for (key, kind) in manifest.iter() {
        let raw = match props {
            HostValue::Object(map) => map.get(key).unwrap_or(&HostValue::Null),
            _ => &HostValue::Null,
        };
        match sanitize(raw, kind) {
            Some(value) => {
                sanitized.insert(key.to_string(), value);
            }
            None if !raw.is_null() => {
                tracing::debug!(key, %kind, value = ?raw, "property dropped by sanitizer");
            }
            None => {}
        }
    }
    if let HostValue::Object(map) = props {
        for key in map.keys().filter(|key| !manifest.contains(key)) {
            tracing::debug!(key = key.as_str(), "unknown property dropped");
        }
    }
    HostValue::Object(sanitized)
}

/// Sanitize one value against `kind`, or None to drop it.
pub fn sanitize(value: &HostValue, kind: &ValueKind) -> Option<HostValue> {
    match kind {
        ValueKind::Int => match value {
            HostValue::Number(n) => Some(HostValue::Number(f64::from(to_int32(*n)))),
            HostValue::String(s) => Some(HostValue::Number(f64::from(parse_int_prefix(s).map_or(0, to_int32)))),
            _ => None,
        },
        ValueKind::Float => match value {
            HostValue::Number(n) if !n.is_nan() => Some(HostValue::Number(*n)),
            HostValue::String(s) => parse_float_prefix(s).map(HostValue::Number),
            _ => None,
        },
        ValueKind::String => value.as_str().map(HostValue::from),
        ValueKind::Boolean => Some(HostValue::Boolean(truthy(value))),
        ValueKind::Length => match value {
            HostValue::Number(n) if n.is_finite() => {
                Some(HostValue::String(format!("{}px", format_number(*n))))
            }
            HostValue::String(s) if LENGTH_TEXT.is_match(s) => Some(value.clone()),
            _ => None,
        },
        ValueKind::Brush => sanitize_brush(value),
        ValueKind::Alignment => value
            .as_str()
            .map(|s| HostValue::from(Alignment::parse(s).as_str())),
        ValueKind::Callback => match value {
            HostValue::Function(_) => Some(value.clone()),
            _ => None,
        },
        ValueKind::Iter(item) => match value {
            HostValue::Array(items) => {
                Some(HostValue::Array(items.iter().filter_map(|v| sanitize(v, item)).collect()))
            }
            _ => None,
        },
        ValueKind::Object(schema) => match value {
            HostValue::Object(_) => Some(sanitize_props(value, schema)),
            _ => None,
        },
    }
}

fn truthy(value: &HostValue) -> bool {
    match value {
        HostValue::Null => false,
        HostValue::Boolean(b) => *b,
        HostValue::Number(n) => *n != 0.0 && !n.is_nan(),
        HostValue::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Hex text or a channel object, emitted as a normalized `{ r, g, b, a }` object.
fn sanitize_brush(value: &HostValue) -> Option<HostValue> {
    let color = match value {
        HostValue::String(s) => Rgba::from_hex(s)?,
        HostValue::Object(_) => Brush::coerce(&value.to_json()).color,
        _ => return None,
    };
    Some(HostValue::object([
        ("r", HostValue::Number(f64::from(color.r))),
        ("g", HostValue::Number(f64::from(color.g))),
        ("b", HostValue::Number(f64::from(color.b))),
        ("a", HostValue::Number(color.a)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn manifest(text: &str) -> ObjectSchema {
        ObjectSchema::from_json_str(text).unwrap()
    }

    #[test]
    fn test_drops_unknown_key_and_wrong_kind() {
        let manifest = manifest(r#"{"title":"String","count":"Int"}"#);
        let props = HostValue::from(json!({ "title": "hi", "count": true, "bogus": 1 }));
        let sanitized = sanitize_props(&props, &manifest);
        assert_eq!(sanitized.to_json(), json!({ "title": "hi" }));
    }

    #[rstest]
    #[case(ValueKind::Int, json!(3.9), Some(json!(3)))]
    #[case(ValueKind::Int, json!("12abc"), Some(json!(12)))]
    #[case(ValueKind::Int, json!("abc"), Some(json!(0)))]
    #[case(ValueKind::Int, json!(false), None)]
    #[case(ValueKind::Float, json!("2.5"), Some(json!(2.5)))]
    #[case(ValueKind::Float, json!(true), None)]
    #[case(ValueKind::String, json!(5), None)]
    #[case(ValueKind::Boolean, json!("x"), Some(json!(true)))]
    #[case(ValueKind::Boolean, json!(null), Some(json!(false)))]
    #[case(ValueKind::Length, json!(4), Some(json!("4px")))]
    #[case(ValueKind::Length, json!("3mm"), Some(json!("3mm")))]
    #[case(ValueKind::Length, json!("wide"), None)]
    #[case(ValueKind::Alignment, json!("END"), Some(json!("end")))]
    #[case(ValueKind::Alignment, json!(1), None)]
    #[case(ValueKind::Brush, json!("#08f"), Some(json!({ "r": 0, "g": 136, "b": 255, "a": 1 })))]
    #[case(ValueKind::Brush, json!("blue"), None)]
    #[case(ValueKind::iter(ValueKind::String), json!(["a", 1, "b"]), Some(json!(["a", "b"])))]
    #[case(ValueKind::iter(ValueKind::String), json!("a"), None)]
    fn test_sanitize(#[case] kind: ValueKind, #[case] raw: serde_json::Value, #[case] expected: Option<serde_json::Value>) {
        let sanitized = sanitize(&HostValue::from(&raw), &kind).map(|v| v.to_json());
        assert_eq!(sanitized, expected);
    }

    #[test]
    fn test_callback_requires_function() {
        let f = HostValue::function(|_, _| Ok(HostValue::Null));
        assert_eq!(sanitize(&f, &ValueKind::Callback), Some(f.clone()));
        assert_eq!(sanitize(&HostValue::from("f"), &ValueKind::Callback), None);
    }

    #[test]
    fn test_nested_object() {
        let manifest = manifest(r#"{"style":{"width":"Length","color":"Brush"}}"#);
        let props = HostValue::from(json!({ "style": { "width": 10, "color": 3, "x": 1 } }));
        assert_eq!(sanitize_props(&props, &manifest).to_json(), json!({ "style": { "width": "10px" } }));
    }

    #[test]
    fn test_non_object_props() {
        let manifest = manifest(r#"{"title":"String"}"#);
        assert_eq!(sanitize_props(&HostValue::from(3.0), &manifest).to_json(), json!({}));
    }
}
