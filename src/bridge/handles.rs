//! Handle table - integer references to host values.
//!
//! Manages the lifecycle of handles handed to a module:
//! - 0, 1 and 2 are permanent sentinels for null, true and false
//! - every other handle comes from a growable slot table
//! - released slots go on a free list and are reused LIFO before the table grows
//! - each live value carries a capability tag recorded at insertion
//! - node values are interned so one node always maps to one handle; every
//!   insert of an interned node adds a reference, and the slot is freed when
//!   the last reference is released

use std::collections::HashMap;

use super::host_value::HostValue;
use crate::error::{Result, RuntimeError};
use crate::reconciler::NodeId;

/// Integer reference to a host value.
pub type Handle = u32;

pub const NULL_HANDLE: Handle = 0;
pub const TRUE_HANDLE: Handle = 1;
pub const FALSE_HANDLE: Handle = 2;

/// First handle the table hands out.
const FIRST_DYNAMIC: Handle = 3;

bitflags::bitflags! {
    /// What a handle's value can be used as.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capability: u16 {
        const NULL = 1 << 0;
        const BOOLEAN = 1 << 1;
        const NUMBER = 1 << 2;
        const STRING = 1 << 3;
        const ARRAY = 1 << 4;
        const OBJECT = 1 << 5;
        const FUNCTION = 1 << 6;
        const NODE = 1 << 7;

        /// Values `get_member` can look into.
        const PROPERTY_BEARING = Self::ARRAY.bits() | Self::OBJECT.bits();
    }
}

impl Capability {
    /// Name of a single capability, for error messages.
    pub fn name(self) -> &'static str {
        const NAMES: [(Capability, &str); 8] = [
            (Capability::NULL, "null"),
            (Capability::BOOLEAN, "boolean"),
            (Capability::NUMBER, "number"),
            (Capability::STRING, "string"),
            (Capability::ARRAY, "array"),
            (Capability::OBJECT, "object"),
            (Capability::FUNCTION, "function"),
            (Capability::NODE, "node"),
        ];
        NAMES
            .iter()
            .find(|(capability, _)| *capability == self)
            .map_or("value", |(_, name)| *name)
    }
}

struct Entry {
    value: HostValue,
    capability: Capability,
    /// Outstanding references. Only interned nodes go above one.
    refs: u32,
}

impl Entry {
    fn new(value: HostValue, capability: Capability) -> Self {
        Self { value, capability, refs: 1 }
    }
}

// =============================================================================
// HandleTable
// =============================================================================

/// Slot table mapping handles to host values.
pub struct HandleTable {
    slots: Vec<Option<Entry>>,
    free: Vec<Handle>,
    nodes: HashMap<NodeId, Handle>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with room for `capacity` dynamic handles before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(FIRST_DYNAMIC as usize + capacity);
        slots.push(Some(Entry::new(HostValue::Null, Capability::NULL)));
        slots.push(Some(Entry::new(HostValue::Boolean(true), Capability::BOOLEAN)));
        slots.push(Some(Entry::new(HostValue::Boolean(false), Capability::BOOLEAN)));
        Self { slots, free: Vec::new(), nodes: HashMap::new() }
    }

    /// Number of live dynamic handles.
    pub fn live(&self) -> usize {
        self.slots.len() - FIRST_DYNAMIC as usize - self.free.len()
    }

    /// Store `value` and return its handle.
    ///
    /// Null and booleans map onto their sentinels without allocating. A node
    /// that already has a handle gets that handle back with one more
    /// reference, so each returned handle must be released once.
    pub fn insert(&mut self, value: HostValue) -> Handle {
        let node = match &value {
            HostValue::Null => return NULL_HANDLE,
            HostValue::Boolean(true) => return TRUE_HANDLE,
            HostValue::Boolean(false) => return FALSE_HANDLE,
            HostValue::Node(node) => {
                if let Some(&handle) = self.nodes.get(node) {
                    if let Some(Some(entry)) = self.slots.get_mut(handle as usize) {
                        entry.refs = entry.refs.saturating_add(1);
                        tracing::trace!(handle, refs = entry.refs, "node handle shared");
                    }
                    return handle;
                }
                Some(*node)
            }
            _ => None,
        };

        let capability = value.capability();
        let entry = Entry::new(value, capability);
        let handle = match self.free.pop() {
            Some(handle) => {
                self.slots[handle as usize] = Some(entry);
                handle
            }
            None => {
                self.slots.push(Some(entry));
                (self.slots.len() - 1) as Handle
            }
        };
        if let Some(node) = node {
            self.nodes.insert(node, handle);
        }
        tracing::trace!(handle, ?capability, "handle allocated");
        handle
    }

    fn entry(&self, handle: Handle) -> Result<&Entry> {
        self.slots
            .get(handle as usize)
            .and_then(Option::as_ref)
            .ok_or(RuntimeError::DanglingHandle(handle))
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entry(handle).is_ok()
    }

    pub fn get(&self, handle: Handle) -> Result<&HostValue> {
        self.entry(handle).map(|entry| &entry.value)
    }

    /// Mutable access for in-place container building. Sentinels are immutable.
    pub(crate) fn get_mut(&mut self, handle: Handle) -> Option<&mut HostValue> {
        if handle < FIRST_DYNAMIC {
            return None;
        }
        self.slots.get_mut(handle as usize)?.as_mut().map(|entry| &mut entry.value)
    }

    pub fn capability(&self, handle: Handle) -> Result<Capability> {
        self.entry(handle).map(|entry| entry.capability)
    }

    /// Value of `handle`, which must carry `capability`.
    pub fn expect(&self, handle: Handle, capability: Capability) -> Result<&HostValue> {
        let entry = self.entry(handle)?;
        if entry.capability.intersects(capability) {
            Ok(&entry.value)
        } else {
            Err(RuntimeError::WrongHandleKind { handle, expected: capability.name() })
        }
    }

    /// Node referenced by `handle`.
    pub fn node(&self, handle: Handle) -> Result<NodeId> {
        match self.expect(handle, Capability::NODE)? {
            HostValue::Node(node) => Ok(*node),
            _ => Err(RuntimeError::WrongHandleKind { handle, expected: "node" }),
        }
    }

    /// Node referenced by `handle`, or None for the null handle.
    pub fn optional_node(&self, handle: Handle) -> Result<Option<NodeId>> {
        if handle == NULL_HANDLE {
            return Ok(None);
        }
        self.node(handle).map(Some)
    }

    /// Outstanding references to `handle`.
    pub fn references(&self, handle: Handle) -> Result<u32> {
        self.entry(handle).map(|entry| entry.refs)
    }

    /// Release `handle` and return its value.
    ///
    /// Sentinels are permanent: releasing one returns its value and leaves
    /// it live. A shared node handle stays live until its last reference is
    /// released. Releasing a dead handle is an error.
    pub fn release(&mut self, handle: Handle) -> Result<HostValue> {
        if handle < FIRST_DYNAMIC {
            return self.get(handle).cloned();
        }
        let slot = self
            .slots
            .get_mut(handle as usize)
            .ok_or(RuntimeError::DanglingHandle(handle))?;
        if let Some(entry) = slot.as_mut().filter(|entry| entry.refs > 1) {
            entry.refs -= 1;
            tracing::trace!(handle, refs = entry.refs, "node handle reference released");
            return Ok(entry.value.clone());
        }
        let entry = slot.take().ok_or(RuntimeError::DanglingHandle(handle))?;
        if let HostValue::Node(node) = &entry.value {
            self.nodes.remove(node);
        }
        self.free.push(handle);
        tracing::trace!(handle, "handle released");
        Ok(entry.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_sentinels() {
        let mut table = HandleTable::new();
        assert_eq!(table.insert(HostValue::Null), NULL_HANDLE);
        assert_eq!(table.insert(HostValue::Boolean(true)), TRUE_HANDLE);
        assert_eq!(table.insert(HostValue::Boolean(false)), FALSE_HANDLE);
        assert_eq!(table.live(), 0);

        assert_eq!(table.release(TRUE_HANDLE).unwrap(), HostValue::Boolean(true));
        assert_eq!(table.get(TRUE_HANDLE).unwrap(), &HostValue::Boolean(true));
    }

    #[test]
    fn test_first_dynamic_handle() {
        let mut table = HandleTable::new();
        assert_eq!(table.insert(HostValue::from(1.0)), 3);
        assert_eq!(table.insert(HostValue::from("x")), 4);
    }

    #[test]
    fn test_released_handle_is_reused_first() {
        let mut table = HandleTable::with_capacity(4);
        let a = table.insert(HostValue::from("a"));
        let b = table.insert(HostValue::from("b"));
        table.release(a).unwrap();
        table.release(b).unwrap();

        assert_eq!(table.insert(HostValue::from("c")), b);
        assert_eq!(table.insert(HostValue::from("d")), a);
        assert_eq!(table.insert(HostValue::from("e")), 5);
    }

    #[test]
    fn test_dangling() {
        let mut table = HandleTable::new();
        let h = table.insert(HostValue::from(2.0));
        table.release(h).unwrap();
        assert_eq!(table.get(h).err(), Some(RuntimeError::DanglingHandle(h)));
        assert_eq!(table.release(h).err(), Some(RuntimeError::DanglingHandle(h)));
        assert!(table.get(99).is_err());
    }

    #[rstest]
    #[case(HostValue::from("s"), Capability::NUMBER, "number")]
    #[case(HostValue::from(1.0), Capability::STRING, "string")]
    #[case(HostValue::from(1.0), Capability::NODE, "node")]
    fn test_wrong_kind(#[case] value: HostValue, #[case] wanted: Capability, #[case] name: &'static str) {
        let mut table = HandleTable::new();
        let h = table.insert(value);
        assert_eq!(
            table.expect(h, wanted).err(),
            Some(RuntimeError::WrongHandleKind { handle: h, expected: name })
        );
    }

    #[test]
    fn test_nodes_are_interned() {
        let mut doc = crate::reconciler::Document::<std::rc::Rc<dyn Fn()>>::new();
        let node = doc.create_element("div");
        let mut table = HandleTable::new();
        let h = table.insert(HostValue::Node(node));
        assert_eq!(table.insert(HostValue::Node(node)), h);
        assert_eq!(table.node(h).unwrap(), node);
        assert_eq!(table.references(h).unwrap(), 2);
        assert_eq!(table.live(), 1);

        table.release(h).unwrap();
        assert_eq!(table.node(h).unwrap(), node);
        assert_eq!(table.insert(HostValue::from("x")), h + 1);

        table.release(h).unwrap();
        assert_eq!(table.release(h).err(), Some(RuntimeError::DanglingHandle(h)));
        assert_eq!(table.insert(HostValue::from("y")), h);
        assert!(table.node(h).is_err());
    }

    #[test]
    fn test_released_node_is_interned_afresh() {
        let mut doc = crate::reconciler::Document::<std::rc::Rc<dyn Fn()>>::new();
        let node = doc.create_element("div");
        let mut table = HandleTable::new();
        let h = table.insert(HostValue::Node(node));
        table.release(h).unwrap();

        let again = table.insert(HostValue::Node(node));
        assert_eq!(table.references(again).unwrap(), 1);
        assert_eq!(table.node(again).unwrap(), node);
    }
}
