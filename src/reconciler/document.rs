//! In-memory host document.
//!
//! An arena of element and text nodes with ordered children, inline style
//! properties and event listeners. Node ids are arena indices and are never
//! reused, so a stale id can still be inspected after removal.
//!
//! Every structural mutation is counted in [`MutationStats`].

use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Result, RuntimeError};

/// Id of a document node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Callback stored as an event listener. Identity decides rebinding.
pub trait Listener: Clone {
    fn same_listener(&self, other: &Self) -> bool;
}

impl<T: ?Sized> Listener for Rc<T> {
    fn same_listener(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

/// Structural mutation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationStats {
    pub created: usize,
    pub inserted: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: String },
    Text,
}

struct NodeData<L> {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: String,
    style: IndexMap<String, String>,
    listeners: IndexMap<String, L>,
}

impl<L> NodeData<L> {
    fn new(kind: NodeKind, text: String) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            text,
            style: IndexMap::new(),
            listeners: IndexMap::new(),
        }
    }
}

/// Node tree with a `body` root element.
pub struct Document<L> {
    nodes: Vec<NodeData<L>>,
    root: NodeId,
    stats: MutationStats,
}

impl<L: Listener> Default for Document<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Listener> Document<L> {
    pub fn new() -> Self {
        let body = NodeData::new(NodeKind::Element { tag: "body".to_string() }, String::new());
        Self { nodes: vec![body], root: NodeId(0), stats: MutationStats::default() }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn stats(&self) -> MutationStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = MutationStats::default();
    }

    /// Nodes ever created, the root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    fn node(&self, node: NodeId) -> Result<&NodeData<L>> {
        self.nodes.get(node.0).ok_or(RuntimeError::UnknownNode(node.0))
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut NodeData<L>> {
        self.nodes.get_mut(node.0).ok_or(RuntimeError::UnknownNode(node.0))
    }

    // =========================================================================
    // Creation
    // =========================================================================

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::new(NodeKind::Element { tag: tag.to_string() }, String::new()))
    }

    pub fn create_text_node(&mut self, text: &str) -> NodeId {
        self.push(NodeData::new(NodeKind::Text, text.to_string()))
    }

    fn push(&mut self, data: NodeData<L>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(data);
        self.stats.created += 1;
        tracing::trace!(node = id.0, "node created");
        id
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// Unlink `node` from its parent without counting a removal.
    fn detach(&mut self, node: NodeId) -> Result<bool> {
        let Some(parent) = self.node(node)?.parent else {
            return Ok(false);
        };
        self.node_mut(parent)?.children.retain(|child| *child != node);
        self.node_mut(node)?.parent = None;
        Ok(true)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` under `parent` before `reference`, or last when
    /// `reference` is None. The child moves if it was attached elsewhere.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> Result<()> {
        self.node(parent)?;
        self.detach(child)?;
        let children = &mut self.node_mut(parent)?.children;
        let at = match reference {
            None => children.len(),
            Some(reference) => children
                .iter()
                .position(|c| *c == reference)
                .ok_or(RuntimeError::UnknownNode(reference.0))?,
        };
        children.insert(at, child);
        self.node_mut(child)?.parent = Some(parent);
        self.stats.inserted += 1;
        Ok(())
    }

    /// Detach `node` from the tree. Removing a detached node does nothing.
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        if self.detach(node)? {
            self.stats.removed += 1;
            tracing::trace!(node = node.0, "node removed");
        }
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(node)?.parent)
    }

    pub fn children(&self, node: NodeId) -> Result<&[NodeId]> {
        Ok(&self.node(node)?.children)
    }

    pub fn first_child(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(node)?.children.first().copied())
    }

    pub fn next_sibling(&self, node: NodeId) -> Result<Option<NodeId>> {
        let Some(parent) = self.node(node)?.parent else {
            return Ok(None);
        };
        let siblings = &self.node(parent)?.children;
        Ok(siblings
            .iter()
            .position(|c| *c == node)
            .and_then(|i| siblings.get(i + 1).copied()))
    }

    // =========================================================================
    // Content
    // =========================================================================

    pub fn kind(&self, node: NodeId) -> Result<&NodeKind> {
        Ok(&self.node(node)?.kind)
    }

    /// Tag of an element, None for text nodes.
    pub fn tag(&self, node: NodeId) -> Result<Option<&str>> {
        Ok(match &self.node(node)?.kind {
            NodeKind::Element { tag } => Some(tag.as_str()),
            NodeKind::Text => None,
        })
    }

    /// Set a node's text. On an element this replaces its children.
    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<()> {
        if matches!(self.node(node)?.kind, NodeKind::Element { .. }) {
            let children = self.node(node)?.children.clone();
            for child in children {
                self.remove(child)?;
            }
        }
        self.node_mut(node)?.text = text.to_string();
        Ok(())
    }

    /// Own text followed by the text of every descendant, in order.
    pub fn text_content(&self, node: NodeId) -> Result<String> {
        let data = self.node(node)?;
        let mut text = data.text.clone();
        for child in &data.children {
            text.push_str(&self.text_content(*child)?);
        }
        Ok(text)
    }

    pub fn set_style(&mut self, node: NodeId, property: &str, value: &str) -> Result<()> {
        let style = &mut self.node_mut(node)?.style;
        if value.is_empty() {
            style.shift_remove(property);
        } else {
            style.insert(property.to_string(), value.to_string());
        }
        Ok(())
    }

    pub fn style(&self, node: NodeId, property: &str) -> Result<Option<&str>> {
        Ok(self.node(node)?.style.get(property).map(String::as_str))
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Attach a listener, replacing any listener bound to the same event.
    pub fn add_event_listener(&mut self, node: NodeId, event: &str, listener: L) -> Result<()> {
        self.node_mut(node)?.listeners.insert(event.to_string(), listener);
        Ok(())
    }

    pub fn remove_event_listener(&mut self, node: NodeId, event: &str) -> Result<Option<L>> {
        Ok(self.node_mut(node)?.listeners.shift_remove(event))
    }

    pub fn listener(&self, node: NodeId, event: &str) -> Result<Option<&L>> {
        Ok(self.node(node)?.listeners.get(event))
    }

    pub fn listener_count(&self, node: NodeId) -> Result<usize> {
        Ok(self.node(node)?.listeners.len())
    }
}
