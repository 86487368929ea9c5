//! Scalar coercions: Int, Float, Boolean, String, Alignment.
//!
//! Raw input is a plain JSON value. Numeric coercion never yields a
//! non-finite number: anything that cannot be read as a number becomes 0.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as Json;

// =============================================================================
// Number parsing
// =============================================================================

static FLOAT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+\.?\d*(?:[eE][+-]?\d+)?|\.\d+(?:[eE][+-]?\d+)?))")
        .expect("float prefix pattern")
});

static INT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([+-]?\d+)").expect("int prefix pattern"));

/// Parse the longest leading float literal of `text` ("2.5in" -> 2.5).
pub fn parse_float_prefix(text: &str) -> Option<f64> {
    let captures = FLOAT_PREFIX.captures(text)?;
    captures[1].parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse the leading integer digits of `text` ("42px" -> 42).
pub fn parse_int_prefix(text: &str) -> Option<f64> {
    let captures = INT_PREFIX.captures(text)?;
    captures[1].parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Truncate toward zero and wrap into 32 bits (`n | 0`).
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    const TWO_32: f64 = 4_294_967_296.0;
    let wrapped = n.trunc().rem_euclid(TWO_32);
    if wrapped >= TWO_32 / 2.0 {
        (wrapped - TWO_32) as i32
    } else {
        wrapped as i32
    }
}

/// Format a number the way a plain-value consumer expects (`10`, `2.5`).
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    format!("{n}")
}

/// Plain number. Integral values become JSON integers so `2.0` and `2`
/// compare equal; non-finite values become 0.
pub fn number_to_json(n: f64) -> Json {
    const SAFE: f64 = 9_007_199_254_740_992.0;
    if !n.is_finite() {
        return Json::from(0);
    }
    if n.fract() == 0.0 && n.abs() < SAFE {
        return Json::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(Json::from(0), Json::Number)
}

/// Number from a JSON value, if it is one.
pub(crate) fn json_number(raw: &Json) -> Option<f64> {
    raw.as_f64().filter(|n| n.is_finite())
}

// =============================================================================
// Coercions
// =============================================================================

/// Int: numbers truncate, text parses its leading digits, everything else is 0.
pub fn coerce_int(raw: &Json) -> i32 {
    match raw {
        Json::Number(_) => json_number(raw).map(to_int32).unwrap_or(0),
        Json::String(s) => parse_int_prefix(s).map(to_int32).unwrap_or(0),
        _ => 0,
    }
}

/// Float: numbers pass through, text parses its leading literal, everything else is 0.
pub fn coerce_float(raw: &Json) -> f64 {
    match raw {
        Json::Number(_) => json_number(raw).unwrap_or(0.0),
        Json::String(s) => parse_float_prefix(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Boolean: truthiness collapse.
pub fn coerce_boolean(raw: &Json) -> bool {
    match raw {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(_) => json_number(raw).is_some_and(|n| n != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(_) | Json::Object(_) => true,
    }
}

/// String: stringify any scalar.
pub fn coerce_string(raw: &Json) -> String {
    stringify(raw)
}

/// Plain-text rendering of a raw value. Arrays join their elements with `,`.
pub fn stringify(raw: &Json) -> String {
    match raw {
        Json::Null => String::new(),
        Json::Bool(b) => b.to_string(),
        Json::Number(_) => format_number(raw.as_f64().unwrap_or(0.0)),
        Json::String(s) => s.clone(),
        Json::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Json::Object(_) => "[object Object]".to_string(),
    }
}

// =============================================================================
// Alignment
// =============================================================================

/// Cross-axis alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Alignment {
    Start,
    Center,
    End,
    /// Anything unrecognized.
    #[default]
    Stretch,
}

impl Alignment {
    /// Case-insensitive parse; unknown text resolves to `Stretch`.
    pub fn parse(text: &str) -> Self {
        match text.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "center" => Self::Center,
            "end" => Self::End,
            _ => Self::Stretch,
        }
    }

    /// Canonical text form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Center => "center",
            Self::End => "end",
            Self::Stretch => "stretch",
        }
    }
}

/// Alignment from any raw value (stringified first).
pub fn coerce_alignment(raw: &Json) -> Alignment {
    match raw {
        Json::Null => Alignment::Stretch,
        other => Alignment::parse(&stringify(other)),
    }
}
