//! Host-side values the handle table can hold.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use super::handles::Capability;
use super::runtime::Runtime;
use crate::error::Result;
use crate::reconciler::NodeId;
use crate::types::{format_number, number_to_json};

/// A host callable. Identity (the `Rc` allocation) decides event rebinding.
pub type HostFunction = Rc<dyn Fn(&mut Runtime, &[HostValue]) -> Result<HostValue>>;

/// An opaque host value referenced from a module by handle.
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<HostValue>),
    Object(IndexMap<String, HostValue>),
    Node(NodeId),
    Function(HostFunction),
}

impl HostValue {
    /// Wrap a closure as a function value.
    pub fn function(f: impl Fn(&mut Runtime, &[HostValue]) -> Result<HostValue> + 'static) -> Self {
        Self::Function(Rc::new(f))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Capability tag recorded when the value enters the handle table.
    pub fn capability(&self) -> Capability {
        match self {
            Self::Null => Capability::NULL,
            Self::Boolean(_) => Capability::BOOLEAN,
            Self::Number(_) => Capability::NUMBER,
            Self::String(_) => Capability::STRING,
            Self::Array(_) => Capability::ARRAY,
            Self::Object(_) => Capability::OBJECT,
            Self::Node(_) => Capability::NODE,
            Self::Function(_) => Capability::FUNCTION,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(node) => Some(*node),
            _ => None,
        }
    }

    /// Property lookup by key.
    ///
    /// Objects look the key up directly; arrays accept a decimal index.
    /// Everything else has no properties. Null members count as
    /// absent.
    pub fn property(&self, key: &str) -> Option<&HostValue> {
        let found = match self {
            Self::Object(map) => map.get(key),
            Self::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        found.filter(|value| !value.is_null())
    }

    /// Plain form. Functions and nodes have none and become null.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null | Self::Node(_) | Self::Function(_) => Json::Null,
            Self::Boolean(b) => Json::Bool(*b),
            Self::Number(n) if n.is_finite() => number_to_json(*n),
            Self::Number(_) => Json::Null,
            Self::String(s) => Json::String(s.clone()),
            Self::Array(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => {
                Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<Map<_, _>>())
            }
        }
    }
}

impl From<&Json> for HostValue {
    fn from(json: &Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Boolean(*b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::String(s.clone()),
            Json::Array(items) => Self::Array(items.iter().map(Self::from).collect()),
            Json::Object(map) => Self::Object(map.iter().map(|(k, v)| (k.clone(), Self::from(v))).collect()),
        }
    }
}

impl From<Json> for HostValue {
    fn from(json: Json) -> Self {
        Self::from(&json)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => f.debug_list().entries(items).finish(),
            Self::Object(map) => f.debug_map().entries(map.iter()).finish(),
            Self::Node(node) => write!(f, "Node({})", node.index()),
            Self::Function(func) => write!(f, "Function({:p})", Rc::as_ptr(func)),
        }
    }
}

/// Structural equality. Functions compare by identity.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Node(a), Self::Node(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
