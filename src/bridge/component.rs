//! Component kinds, instances and generated property accessors.
//!
//! A kind is resolved once from the module's exports and its manifest. Each
//! manifest property gets the entry points its kind needs:
//!
//! - value kinds: `get_<prop>` / `set_<prop>`
//! - sequence kinds: additionally `get_index_<prop>` / `set_index_<prop>`
//! - callback kinds: `call_<prop>` / `set_<prop>`
//!
//! A missing entry point fails the load; nothing is resolved lazily.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::host_value::HostValue;
use super::module::{ExportFn, Module, Word};
use super::runtime::Runtime;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::reconciler::NodeId;
use crate::types::{ObjectSchema, ValueKind};

// =============================================================================
// Export resolution
// =============================================================================

/// Looks up `<kind><sep><entry>` exports for one kind.
pub(crate) struct Resolver<'a> {
    pub kind: &'a str,
    pub module: &'a Module,
    pub config: &'a RuntimeConfig,
}

impl Resolver<'_> {
    pub fn require(&self, entry: &str) -> Result<ExportFn> {
        let name = self.config.export_name(self.kind, entry);
        self.module.get(&name).ok_or_else(|| RuntimeError::InvalidComponent {
            kind: self.kind.to_string(),
            export: name,
        })
    }
}

/// Entry points every kind exports.
pub(crate) struct Lifecycle {
    pub new_component: ExportFn,
    pub attach_to_node: ExportFn,
    pub render_component: ExportFn,
    pub update_component: ExportFn,
}

impl Lifecycle {
    pub fn resolve(resolver: &Resolver<'_>) -> Result<Self> {
        Ok(Self {
            new_component: resolver.require("new_component")?,
            attach_to_node: resolver.require("attach_to_node")?,
            render_component: resolver.require("render_component")?,
            update_component: resolver.require("update_component")?,
        })
    }
}

/// Per-property entry points.
pub(crate) enum PropertyExports {
    Value { get: ExportFn, set: ExportFn },
    Sequence { get: ExportFn, set: ExportFn, get_index: ExportFn, set_index: ExportFn },
    Callback { call: ExportFn, set: ExportFn },
}

impl PropertyExports {
    fn resolve(resolver: &Resolver<'_>, key: &str, kind: &ValueKind) -> Result<Self> {
        let set = resolver.require(&format!("set_{key}"))?;
        Ok(match kind {
            ValueKind::Callback => Self::Callback { call: resolver.require(&format!("call_{key}"))?, set },
            ValueKind::Iter(_) => Self::Sequence {
                get: resolver.require(&format!("get_{key}"))?,
                set,
                get_index: resolver.require(&format!("get_index_{key}"))?,
                set_index: resolver.require(&format!("set_index_{key}"))?,
            },
            _ => Self::Value { get: resolver.require(&format!("get_{key}"))?, set },
        })
    }

    pub fn setter(&self) -> &ExportFn {
        match self {
            Self::Value { set, .. } | Self::Sequence { set, .. } | Self::Callback { set, .. } => set,
        }
    }
}

// =============================================================================
// ComponentKind
// =============================================================================

/// A loaded component kind: its manifest plus every resolved entry point.
pub struct ComponentKind {
    name: String,
    manifest: Rc<ObjectSchema>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) properties: IndexMap<String, PropertyExports>,
}

impl ComponentKind {
    pub(crate) fn resolve(resolver: &Resolver<'_>, manifest: ObjectSchema, lifecycle: Lifecycle) -> Result<Self> {
        let mut properties = IndexMap::with_capacity(manifest.len());
        for (key, kind) in manifest.iter() {
            properties.insert(key.to_string(), PropertyExports::resolve(resolver, key, kind)?);
        }
        Ok(Self {
            name: resolver.kind.to_string(),
            manifest: Rc::new(manifest),
            lifecycle,
            properties,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &Rc<ObjectSchema> {
        &self.manifest
    }

    pub(crate) fn property(&self, key: &str) -> Result<(&ValueKind, &PropertyExports)> {
        let kind = self
            .manifest
            .get(key)
            .ok_or_else(|| RuntimeError::UnknownProperty(key.to_string()))?;
        let exports = self
            .properties
            .get(key)
            .ok_or_else(|| RuntimeError::UnknownProperty(key.to_string()))?;
        Ok((kind, exports))
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentKind")
            .field("name", &self.name)
            .field("manifest", &self.manifest.to_json())
            .finish()
    }
}

// =============================================================================
// Instances
// =============================================================================

/// Host-side id of a constructed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) usize);

impl InstanceId {
    pub const fn index(self) -> usize {
        self.0
    }
}

pub(crate) struct ComponentInstance {
    pub kind: Rc<ComponentKind>,
    /// Opaque reference returned by the module's constructor.
    pub reference: Word,
    pub node: Option<NodeId>,
}

// =============================================================================
// Property values
// =============================================================================

/// Result of reading a component property.
#[derive(Debug, Clone)]
pub enum Property {
    /// Scalar or structured value, converted to a host value.
    Value(HostValue),
    /// Index-addressable view over a sequence property.
    Sequence(SequenceProperty),
    /// Invokes the property's call entry point.
    Callback(CallbackProperty),
}

impl Property {
    pub fn into_value(self) -> Option<HostValue> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceProperty> {
        match self {
            Self::Sequence(sequence) => Some(sequence),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&CallbackProperty> {
        match self {
            Self::Callback(callback) => Some(callback),
            _ => None,
        }
    }
}

/// Sequence property bound to its index getter and setter.
#[derive(Debug, Clone)]
pub struct SequenceProperty {
    pub(crate) instance: InstanceId,
    pub(crate) key: String,
}

impl SequenceProperty {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Element at `index`; null past the end.
    pub fn get(&self, rt: &mut Runtime, index: u32) -> Result<HostValue> {
        rt.sequence_get(self.instance, &self.key, index)
    }

    /// Write one element. Values that fail sanitization are dropped.
    pub fn set(&self, rt: &mut Runtime, index: u32, value: HostValue) -> Result<()> {
        rt.sequence_set(self.instance, &self.key, index, value)
    }

    /// Every element, read by index until the first null.
    pub fn to_vec(&self, rt: &mut Runtime) -> Result<Vec<HostValue>> {
        let mut items = Vec::new();
        for index in 0.. {
            let item = self.get(rt, index)?;
            if item.is_null() {
                break;
            }
            items.push(item);
        }
        Ok(items)
    }
}

/// Callback property of one instance.
#[derive(Debug, Clone)]
pub struct CallbackProperty {
    pub(crate) instance: InstanceId,
    pub(crate) key: String,
}

impl CallbackProperty {
    pub fn invoke(&self, rt: &mut Runtime) -> Result<()> {
        rt.invoke_callback(self.instance, &self.key)
    }

    /// Host function that invokes this callback.
    pub fn to_host_function(&self) -> HostValue {
        let callback = self.clone();
        HostValue::function(move |rt, _| {
            callback.invoke(rt)?;
            Ok(HostValue::Null)
        })
    }
}
