//! Length values with a unit.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as Json;

use super::scalar::{format_number, json_number, parse_float_prefix};

static INCHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d*\.\d+|\d+)in$").expect("inch pattern"));

static CENTIMETERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d*\.\d+|\d+)cm$").expect("centimeter pattern"));

/// Unit of a [`Length`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum LengthUnit {
    #[default]
    Px,
    In,
    Cm,
}

impl LengthUnit {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Px => "px",
            Self::In => "in",
            Self::Cm => "cm",
        }
    }

    fn from_suffix(unit: &str) -> Self {
        match unit {
            "in" => Self::In,
            "cm" => Self::Cm,
            _ => Self::Px,
        }
    }
}

/// A length such as `10px` or `2.5in`.
///
/// # Examples
///
/// ```
/// use spark_bridge::types::{Length, LengthUnit};
///
/// let l = Length::parse("2.5in");
/// assert_eq!(l, Length::new(2.5, LengthUnit::In));
/// assert_eq!(l.to_string(), "2.5in");
///
/// // Unknown suffixes fall back to pixels
/// assert_eq!(Length::parse("3mm").to_string(), "3px");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub const fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    pub const fn px(value: f64) -> Self {
        Self::new(value, LengthUnit::Px)
    }

    /// Parse length text. The unit is `in`/`cm` only when the whole text
    /// matches `<number><unit>`; otherwise pixels. The numeric part is the
    /// leading float literal, 0 if there is none.
    pub fn parse(text: &str) -> Self {
        Self::parse_in(text, LengthUnit::Px)
    }

    /// Like [`parse`](Self::parse), with `unit` in place of pixels when the
    /// text carries no suffix of its own.
    fn parse_in(text: &str, unit: LengthUnit) -> Self {
        let unit = if INCHES.is_match(text) {
            LengthUnit::In
        } else if CENTIMETERS.is_match(text) {
            LengthUnit::Cm
        } else {
            unit
        };
        Self::new(parse_float_prefix(text).unwrap_or(0.0), unit)
    }

    /// Coerce any raw value into a length.
    ///
    /// Accepts a number (pixels), length text, or a `{ value, unit }` object.
    pub fn coerce(raw: &Json) -> Self {
        match raw {
            Json::Number(_) => Self::px(json_number(raw).unwrap_or(0.0)),
            Json::String(s) => Self::parse(s),
            Json::Object(map) => {
                let unit = map
                    .get("unit")
                    .and_then(Json::as_str)
                    .map(LengthUnit::from_suffix)
                    .unwrap_or_default();
                match map.get("value") {
                    Some(Json::String(s)) => Self::parse_in(s, unit),
                    Some(value @ Json::Number(_)) => Self::new(json_number(value).unwrap_or(0.0), unit),
                    _ => Self::new(0.0, unit),
                }
            }
            _ => Self::default(),
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", format_number(self.value), self.unit.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("10px")]
    #[case("2.5in")]
    #[case("0.5cm")]
    #[case("0px")]
    fn test_canonical_round_trip(#[case] text: &str) {
        assert_eq!(Length::coerce(&json!(text)).to_string(), text);
    }

    #[test]
    fn test_number_is_pixels() {
        assert_eq!(Length::coerce(&json!(12)), Length::px(12.0));
    }

    #[test]
    fn test_garbage_is_zero_pixels() {
        assert_eq!(Length::coerce(&json!("wide")), Length::px(0.0));
        assert_eq!(Length::coerce(&json!(true)), Length::px(0.0));
    }

    #[test]
    fn test_object_form() {
        let l = Length::coerce(&json!({ "value": 4, "unit": "cm" }));
        assert_eq!(l, Length::new(4.0, LengthUnit::Cm));
    }

    #[rstest]
    #[case(json!({ "value": "4", "unit": "cm" }), Length::new(4.0, LengthUnit::Cm))]
    #[case(json!({ "value": "4in", "unit": "cm" }), Length::new(4.0, LengthUnit::In))]
    #[case(json!({ "value": "4px", "unit": "cm" }), Length::new(4.0, LengthUnit::Cm))]
    #[case(json!({ "value": "4" }), Length::px(4.0))]
    fn test_object_text_value_keeps_unit(#[case] raw: Json, #[case] expected: Length) {
        assert_eq!(Length::coerce(&raw), expected);
    }

    #[test]
    fn test_leading_dot() {
        assert_eq!(Length::parse(".5in"), Length::new(0.5, LengthUnit::In));
    }
}
