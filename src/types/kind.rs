//! Value kinds and object schemas.
//!
//! A kind names what a property holds. The serialized form is the property
//! manifest shape: a scalar tag (`"Int"`), a single-element array naming a
//! sequence's item kind (`["String"]`), or an object of nested kinds.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Result, RuntimeError};

/// Declared kind of a property or sequence element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub enum ValueKind {
    Int,
    Float,
    Boolean,
    String,
    Length,
    Brush,
    Alignment,
    /// Event-style property backed by a module call entry point.
    Callback,
    /// Sequence of the item kind: a count or a reactive collection.
    Iter(Box<ValueKind>),
    /// Nested reactive object.
    Object(Rc<ObjectSchema>),
}

impl ValueKind {
    /// Kind for an explicit sequence.
    pub fn iter(item: ValueKind) -> Self {
        Self::Iter(Box::new(item))
    }

    /// Scalar tag, if this is a scalar or callback kind.
    pub const fn tag(&self) -> Option<&'static str> {
        Some(match self {
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
            Self::String => "String",
            Self::Length => "Length",
            Self::Brush => "Brush",
            Self::Alignment => "Alignment",
            Self::Callback => "Callback",
            Self::Iter(_) | Self::Object(_) => return None,
        })
    }

    /// Parse a scalar tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "Int" => Self::Int,
            "Float" => Self::Float,
            "Boolean" => Self::Boolean,
            "String" => Self::String,
            "Length" => Self::Length,
            "Brush" => Self::Brush,
            "Alignment" => Self::Alignment,
            "Callback" => Self::Callback,
            _ => return None,
        })
    }

    /// True for kinds whose values are reactive nodes.
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Iter(_) | Self::Object(_))
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iter(item) => write!(f, "[{item}]"),
            Self::Object(_) => f.write_str("Object"),
            other => f.write_str(other.tag().unwrap_or("?")),
        }
    }
}

impl TryFrom<Json> for ValueKind {
    type Error = RuntimeError;

    fn try_from(json: Json) -> Result<Self> {
        match json {
            Json::String(tag) => Self::from_tag(&tag)
                .ok_or_else(|| RuntimeError::InvalidManifest(format!("unknown type tag `{tag}`"))),
            Json::Array(mut items) if items.len() == 1 => {
                let item = Self::try_from(items.remove(0))?;
                if item == Self::Callback {
                    return Err(RuntimeError::InvalidManifest("sequence of Callback".into()));
                }
                Ok(Self::iter(item))
            }
            Json::Array(items) => Err(RuntimeError::InvalidManifest(format!(
                "sequence type must have exactly one item kind, found {}",
                items.len()
            ))),
            Json::Object(map) => {
                let mut props = IndexMap::with_capacity(map.len());
                for (key, kind) in map {
                    props.insert(key, Self::try_from(kind)?);
                }
                Ok(Self::Object(Rc::new(ObjectSchema { props })))
            }
            other => Err(RuntimeError::InvalidManifest(format!("unexpected type entry {other}"))),
        }
    }
}

impl From<ValueKind> for Json {
    fn from(kind: ValueKind) -> Json {
        match kind {
            ValueKind::Iter(item) => Json::Array(vec![Json::from(*item)]),
            ValueKind::Object(schema) => schema.to_json(),
            scalar => Json::String(scalar.tag().unwrap_or_default().to_string()),
        }
    }
}

// =============================================================================
// ObjectSchema
// =============================================================================

/// Ordered property name -> kind table of a reactive object.
///
/// The property manifest of a component kind is an `ObjectSchema`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    props: IndexMap<String, ValueKind>,
}

impl ObjectSchema {
    pub fn new(props: impl IntoIterator<Item = (String, ValueKind)>) -> Self {
        Self { props: props.into_iter().collect() }
    }

    /// Parse a serialized manifest (`{"count": "Int", "items": ["String"]}`).
    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: Json =
            serde_json::from_str(text).map_err(|e| RuntimeError::InvalidManifest(e.to_string()))?;
        match ValueKind::try_from(json)? {
            ValueKind::Object(schema) => Ok(Rc::unwrap_or_clone(schema)),
            other => Err(RuntimeError::InvalidManifest(format!("expected an object, found {other}"))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ValueKind> {
        self.props.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.props.contains_key(key)
    }

    /// Properties in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueKind)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Serialized manifest form.
    pub fn to_json(&self) -> Json {
        Json::Object(
            self.props
                .iter()
                .map(|(k, v)| (k.clone(), Json::from(v.clone())))
                .collect(),
        )
    }
}
