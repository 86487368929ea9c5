//! Typed values: defaults, coercion, flattening and structural equality.

use std::fmt;

use serde_json::Value as Json;

use super::brush::Brush;
use super::kind::ValueKind;
use super::length::Length;
use super::scalar::{
    coerce_alignment, coerce_boolean, coerce_float, coerce_int, coerce_string, number_to_json,
    Alignment,
};
use crate::error::{Result, RuntimeError};
use crate::reactive::{CoerceContext, ReactiveCollection, ReactiveObject};

// =============================================================================
// Iterable
// =============================================================================

/// A generated index sequence `0..count` of some item kind.
///
/// Produced when a sequence property is given a count instead of an
/// explicit list. It is not reactive.
#[derive(Debug, Clone, PartialEq)]
pub struct Iterable {
    pub item_kind: ValueKind,
    pub count: usize,
}

impl Iterable {
    /// Generated items: each index coerced into the item kind.
    pub fn items(&self) -> Result<Vec<Value>> {
        let ctx = CoerceContext::detached();
        (0..self.count)
            .map(|i| coerce(&Json::from(i), &self.item_kind, &ctx))
            .collect()
    }
}

// =============================================================================
// Value
// =============================================================================

/// One typed value.
///
/// Scalars are plain data. `Object` and `Collection` are shared references
/// to reactive nodes; cloning them clones the reference, not the node.
#[derive(Clone)]
pub enum Value {
    Int(i32),
    Float(f64),
    Boolean(bool),
    String(String),
    Length(Length),
    Brush(Brush),
    Alignment(Alignment),
    Iter(Iterable),
    Collection(ReactiveCollection),
    Object(ReactiveObject),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Boolean(_) => "Boolean",
            Self::String(_) => "String",
            Self::Length(_) => "Length",
            Self::Brush(_) => "Brush",
            Self::Alignment(_) => "Alignment",
            Self::Iter(_) => "Iter",
            Self::Collection(_) => "Collection",
            Self::Object(_) => "Object",
        }
    }

    /// True for values that take part in the commit protocol.
    pub const fn is_reactive(&self) -> bool {
        matches!(self, Self::Collection(_) | Self::Object(_))
    }

    /// Plain, non-reactive projection.
    ///
    /// Lengths and brushes become their text forms (`"10px"`,
    /// `"rgba(0,136,255,1)"`), a counted sequence becomes its count, and
    /// reactive nodes become arrays/objects of their visible values.
    pub fn flatten(&self) -> Json {
        match self {
            Self::Int(n) => Json::from(*n),
            Self::Float(n) => number_to_json(*n),
            Self::Boolean(b) => Json::Bool(*b),
            Self::String(s) => Json::String(s.clone()),
            Self::Length(l) => Json::String(l.to_string()),
            Self::Brush(b) => Json::String(b.to_string()),
            Self::Alignment(a) => Json::String(a.as_str().to_string()),
            Self::Iter(it) => Json::from(it.count),
            Self::Collection(c) => c.flatten(),
            Self::Object(o) => o.flatten(),
        }
    }

    /// Structural equality over flattened values.
    ///
    /// Two references to the same reactive node are equal without flattening.
    pub fn structurally_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Length(a), Self::Length(b)) => a == b,
            (Self::Brush(a), Self::Brush(b)) => a == b,
            (Self::Alignment(a), Self::Alignment(b)) => a == b,
            (Self::Object(a), Self::Object(b)) if a.ptr_eq(b) => true,
            (Self::Collection(a), Self::Collection(b)) if a.ptr_eq(b) => true,
            _ => self.flatten() == other.flatten(),
        }
    }

    /// Commit a reactive value; scalars never change on commit.
    pub fn commit(&self) -> Result<bool> {
        match self {
            Self::Object(o) => o.commit(),
            Self::Collection(c) => c.commit(),
            _ => Ok(false),
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&ReactiveCollection> {
        match self {
            Self::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Items of a sequence value (counted or explicit). None for non-sequences.
    pub fn sequence_items(&self) -> Option<Result<Vec<Value>>> {
        match self {
            Self::Iter(it) => Some(it.items()),
            Self::Collection(c) => Some(Ok(c.values())),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind_name(), self.flatten())
    }
}

// =============================================================================
// Default & coercion
// =============================================================================

/// Canonical zero value of a kind.
pub fn default_value(kind: &ValueKind, ctx: &CoerceContext) -> Result<Value> {
    Ok(match kind {
        ValueKind::Int => Value::Int(0),
        ValueKind::Float => Value::Float(0.0),
        ValueKind::Boolean => Value::Boolean(false),
        ValueKind::String => Value::String(String::new()),
        ValueKind::Length => Value::Length(Length::default()),
        ValueKind::Brush => Value::Brush(Brush::default()),
        ValueKind::Alignment => Value::Alignment(Alignment::default()),
        ValueKind::Iter(item) => Value::Iter(Iterable { item_kind: (**item).clone(), count: 0 }),
        ValueKind::Object(schema) => Value::Object(ReactiveObject::new(schema.clone(), ctx)?),
        ValueKind::Callback => return Err(RuntimeError::UnsupportedKind(kind.to_string())),
    })
}

/// Convert raw input into a value of `kind`.
///
/// Absent input (`null`) yields the kind's default. Scalar coercion never
/// fails; only kinds with no value representation (`Callback`) are errors.
/// Nested objects and collections created here join `ctx`'s owner tree.
pub fn coerce(raw: &Json, kind: &ValueKind, ctx: &CoerceContext) -> Result<Value> {
    if raw.is_null() {
        return default_value(kind, ctx);
    }
    Ok(match kind {
        ValueKind::Int => Value::Int(coerce_int(raw)),
        ValueKind::Float => Value::Float(coerce_float(raw)),
        ValueKind::Boolean => Value::Boolean(coerce_boolean(raw)),
        ValueKind::String => Value::String(coerce_string(raw)),
        ValueKind::Length => Value::Length(Length::coerce(raw)),
        ValueKind::Brush => Value::Brush(Brush::coerce(raw)),
        ValueKind::Alignment => Value::Alignment(coerce_alignment(raw)),
        ValueKind::Iter(item) => match raw {
            Json::Array(items) => Value::Collection(ReactiveCollection::from_raw((**item).clone(), items, ctx)?),
            Json::Number(n) => {
                let count = n.as_f64().filter(|n| n.is_finite() && *n > 0.0).unwrap_or(0.0);
                Value::Iter(Iterable { item_kind: (**item).clone(), count: count as usize })
            }
            _ => Value::Iter(Iterable { item_kind: (**item).clone(), count: 0 }),
        },
        ValueKind::Object(schema) => Value::Object(ReactiveObject::from_raw(schema.clone(), raw, ctx)?),
        ValueKind::Callback => return Err(RuntimeError::UnsupportedKind(kind.to_string())),
    })
}
