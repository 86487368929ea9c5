//! Brushes - solid color fills.
//!
//! Every input form normalizes to an [`Rgba`] tuple with integral channels
//! in 0-255 and alpha in 0-1. Anything unrecognized is transparent black.

use std::fmt;

use serde_json::{Map, Value as Json};

use super::scalar::format_number;

// =============================================================================
// Rgba
// =============================================================================

/// Color channels. Alpha is a fraction, not a byte.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f64,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 1.0)
    }

    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0.0);

    /// Build from raw channel values, clamping each into range.
    ///
    /// Color channels are clamped to 0-255 and truncated; alpha is clamped to 0-1.
    pub fn clamped(r: f64, g: f64, b: f64, a: f64) -> Self {
        fn channel(v: f64) -> u8 {
            if v.is_nan() { 0 } else { v.clamp(0.0, 255.0) as u8 }
        }
        let a = if a.is_nan() { 0.0 } else { a.clamp(0.0, 1.0) };
        Self::new(channel(r), channel(g), channel(b), a)
    }

    /// Parse `#RGB`, `#RGBA`, `#RRGGBB` or `#RRGGBBAA`.
    ///
    /// Short forms duplicate each nibble. Returns None for anything else,
    /// including text without the leading `#`.
    ///
    /// # Examples
    ///
    /// ```
    /// use spark_bridge::types::Rgba;
    ///
    /// assert_eq!(Rgba::from_hex("#08f"), Some(Rgba::rgb(0, 136, 255)));
    /// assert_eq!(Rgba::from_hex("#0000"), Some(Rgba::TRANSPARENT));
    /// assert_eq!(Rgba::from_hex("#ff000080").map(|c| c.r), Some(255));
    /// assert!(Rgba::from_hex("08f").is_none());
    /// ```
    pub fn from_hex(text: &str) -> Option<Self> {
        let hex = text.strip_prefix('#')?;

        fn hex_digit(c: u8) -> Option<u8> {
            match c {
                b'0'..=b'9' => Some(c - b'0'),
                b'a'..=b'f' => Some(c - b'a' + 10),
                b'A'..=b'F' => Some(c - b'A' + 10),
                _ => None,
            }
        }

        // One nibble repeated: "8" -> 0x88
        fn doubled(c: u8) -> Option<u8> {
            let n = hex_digit(c)?;
            Some((n << 4) | n)
        }

        fn hex_byte(s: &[u8], i: usize) -> Option<u8> {
            Some((hex_digit(s[i])? << 4) | hex_digit(s[i + 1])?)
        }

        let bytes = hex.as_bytes();
        match bytes.len() {
            3 => Some(Self::rgb(doubled(bytes[0])?, doubled(bytes[1])?, doubled(bytes[2])?)),
            4 => Some(Self::new(
                doubled(bytes[0])?,
                doubled(bytes[1])?,
                doubled(bytes[2])?,
                f64::from(doubled(bytes[3])?) / 255.0,
            )),
            6 => Some(Self::rgb(hex_byte(bytes, 0)?, hex_byte(bytes, 2)?, hex_byte(bytes, 4)?)),
            8 => Some(Self::new(
                hex_byte(bytes, 0)?,
                hex_byte(bytes, 2)?,
                hex_byte(bytes, 4)?,
                f64::from(hex_byte(bytes, 6)?) / 255.0,
            )),
            _ => None,
        }
    }

    /// Read channels from a `{ r, g, b, a }` object. Missing channels are 0.
    pub fn from_channels(map: &Map<String, Json>) -> Self {
        let get = |key: &str| -> f64 {
            match map.get(key) {
                Some(Json::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(Json::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
                Some(Json::Bool(b)) => f64::from(u8::from(*b)),
                _ => 0.0,
            }
        };
        Self::clamped(get("r"), get("g"), get("b"), get("a"))
    }
}

// =============================================================================
// Brush
// =============================================================================

/// Kind of fill a brush paints with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrushKind {
    #[default]
    Color,
}

impl BrushKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Color => "color",
        }
    }
}

/// A fill: kind plus channel tuple.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Brush {
    pub kind: BrushKind,
    pub color: Rgba,
}

impl Brush {
    pub const fn color(color: Rgba) -> Self {
        Self { kind: BrushKind::Color, color }
    }

    pub const TRANSPARENT: Self = Self::color(Rgba::TRANSPARENT);

    /// Coerce any raw value into a brush.
    ///
    /// - hex text of 3/4/6/8 digits
    /// - `{ brushType: "color", value: { r, g, b, a } }`
    /// - a bare `{ r, g, b, a }` channel object
    ///
    /// Other text, and brush objects of an unknown type, give transparent black.
    pub fn coerce(raw: &Json) -> Self {
        match raw {
            Json::Null => Self::default(),
            Json::String(s) => Rgba::from_hex(s).map(Self::color).unwrap_or(Self::TRANSPARENT),
            Json::Object(map) => match map.get("brushType") {
                None | Some(Json::Null) => Self::color(Rgba::from_channels(map)),
                Some(Json::String(kind)) if kind == "color" => match map.get("value") {
                    Some(Json::Object(channels)) => Self::color(Rgba::from_channels(channels)),
                    _ => Self::TRANSPARENT,
                },
                Some(_) => Self::TRANSPARENT,
            },
            // Scalars carry no channels
            _ => Self::TRANSPARENT,
        }
    }

    /// Structured plain form: `{ brushType, value: { r, g, b, a } }`.
    pub fn to_json(&self) -> Json {
        serde_json::json!({
            "brushType": self.kind.as_str(),
            "value": {
                "r": self.color.r,
                "g": self.color.g,
                "b": self.color.b,
                "a": self.color.a,
            }
        })
    }
}

impl fmt::Display for Brush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.color;
        write!(f, "rgba({},{},{},{})", c.r, c.g, c.b, format_number(c.a))
    }
}
