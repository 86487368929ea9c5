//! Position-keyed slot reconciliation.
//!
//! Each parent node keeps a slot list indexed by declared position. A render
//! pass walks positions with [`Reconciler::enter`]/[`Reconciler::out`]:
//!
//! - an empty slot creates its node (element, or text when no tag is given)
//! - a filled slot reuses its node, refreshing text content if supplied
//! - a node entering the document lands right after the last node entered
//!   under the same parent, so document order follows visit order
//!
//! Groups hold a variable-length run of positions in a sub-list. Whatever a
//! pass does not reach before [`Reconciler::end_group`] is detached but stays
//! in the sub-list, ready to be entered again.

use std::collections::HashMap;

use super::document::{Document, Listener, NodeId};
use crate::error::{Result, RuntimeError};

// =============================================================================
// Shadow state
// =============================================================================

#[derive(Debug, Clone)]
enum Slot {
    Node(NodeId),
    Group(Vec<Option<NodeId>>),
}

/// Reconciler bookkeeping for one node.
#[derive(Debug, Default)]
struct Shadow {
    slots: Vec<Option<Slot>>,
    /// Most recently entered child in the current pass.
    last_inserted: Option<NodeId>,
    /// Position of the open group in `slots`.
    group: Option<usize>,
    /// Highest group position visited since `begin_group`.
    last_visited: Option<usize>,
    /// Placed in the document by `enter`.
    attached: bool,
    /// Node whose context encloses this one.
    context_parent: Option<NodeId>,
}

/// Slot lists for every node the reconciler has touched.
#[derive(Debug, Default)]
pub struct Reconciler {
    shadows: HashMap<NodeId, Shadow>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    fn shadow(&mut self, node: NodeId) -> &mut Shadow {
        self.shadows.entry(node).or_default()
    }

    /// Start a render pass over `parent`'s children.
    pub fn begin(&mut self, parent: NodeId) {
        self.shadow(parent).last_inserted = None;
    }

    /// Node recorded at `position` (in the open group, if any).
    pub fn slot(&self, parent: NodeId, position: usize) -> Option<NodeId> {
        let shadow = self.shadows.get(&parent)?;
        match shadow.group {
            Some(group) => match shadow.slots.get(group)? {
                Some(Slot::Group(list)) => list.get(position).copied().flatten(),
                _ => None,
            },
            None => match shadow.slots.get(position)? {
                Some(Slot::Node(node)) => Some(*node),
                _ => None,
            },
        }
    }

    /// Enclosing contexts of `node`, nearest first.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.shadows.get(&node).and_then(|s| s.context_parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.shadows.get(&parent).and_then(|s| s.context_parent);
        }
        chain
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.shadows.get(&node).is_some_and(|s| s.attached)
    }

    // =========================================================================
    // Slot lookup
    // =========================================================================

    /// Resolve (or create) the node at `position` under `parent`.
    fn resolve<L: Listener>(
        &mut self,
        doc: &mut Document<L>,
        parent: NodeId,
        tag: Option<&str>,
        position: usize,
        text: Option<&str>,
    ) -> Result<NodeId> {
        let shadow = self.shadow(parent);
        let existing = match shadow.group {
            Some(group) => {
                shadow.last_visited = Some(shadow.last_visited.map_or(position, |v| v.max(position)));
                match shadow.slots.get(group) {
                    Some(Some(Slot::Group(list))) => list.get(position).copied().flatten(),
                    _ => None,
                }
            }
            None => match shadow.slots.get(position) {
                Some(Some(Slot::Node(node))) => Some(*node),
                _ => None,
            },
        };

        let node = match existing {
            Some(node) => node,
            None => {
                let node = match tag {
                    Some(tag) => doc.create_element(tag),
                    None => doc.create_text_node(""),
                };
                tracing::trace!(parent = parent.index(), position, node = node.index(), "slot filled");
                self.record(parent, position, node)?;
                node
            }
        };

        if let Some(text) = text {
            doc.set_text_content(node, text)?;
        }
        Ok(node)
    }

    fn record(&mut self, parent: NodeId, position: usize, node: NodeId) -> Result<()> {
        let shadow = self.shadow(parent);
        let list = match shadow.group {
            Some(group) => match shadow.slots.get_mut(group) {
                Some(Some(Slot::Group(list))) => list,
                _ => return Err(RuntimeError::UnknownNode(parent.index())),
            },
            None => {
                if shadow.slots.len() <= position {
                    shadow.slots.resize(position + 1, None);
                }
                shadow.slots[position] = Some(Slot::Node(node));
                return Ok(());
            }
        };
        if list.len() <= position {
            list.resize(position + 1, None);
        }
        list[position] = Some(node);
        Ok(())
    }

    // =========================================================================
    // Render pass
    // =========================================================================

    /// Visit `position` under `parent` and make sure its node is in the document.
    ///
    /// Returns the node, which starts its own pass (`begin`) and records
    /// `parent` as its enclosing context.
    pub fn enter<L: Listener>(
        &mut self,
        doc: &mut Document<L>,
        parent: NodeId,
        tag: Option<&str>,
        position: usize,
        text: Option<&str>,
    ) -> Result<NodeId> {
        let node = self.resolve(doc, parent, tag, position, text)?;
        self.begin(node);
        let child = self.shadow(node);
        child.context_parent = Some(parent);
        let already_in = child.attached;

        if !already_in {
            let last = self.shadow(parent).last_inserted;
            match last {
                Some(last) => {
                    let next = doc.next_sibling(last)?;
                    doc.insert_before(parent, node, next)?;
                }
                None => {
                    let first = doc.first_child(parent)?;
                    doc.insert_before(parent, node, first)?;
                }
            }
            self.shadow(node).attached = true;
        }

        self.shadow(parent).last_inserted = Some(node);
        Ok(node)
    }

    /// Visit `position` under `parent` and make sure its node is NOT in the document.
    pub fn out<L: Listener>(
        &mut self,
        doc: &mut Document<L>,
        parent: NodeId,
        tag: Option<&str>,
        position: usize,
        text: Option<&str>,
    ) -> Result<NodeId> {
        let node = self.resolve(doc, parent, tag, position, text)?;
        let shadow = self.shadow(node);
        if shadow.attached {
            shadow.attached = false;
            doc.remove(node)?;
        }
        Ok(node)
    }

    /// Open group `group` (a position in `parent`'s own slot list).
    pub fn begin_group(&mut self, parent: NodeId, group: usize) {
        let shadow = self.shadow(parent);
        if shadow.slots.len() <= group {
            shadow.slots.resize(group + 1, None);
        }
        if !matches!(shadow.slots[group], Some(Slot::Group(_))) {
            shadow.slots[group] = Some(Slot::Group(Vec::new()));
        }
        shadow.group = Some(group);
        shadow.last_visited = None;
    }

    /// Close the open group, detaching every node after the last position
    /// visited (all of them if none was). Returns how many nodes left the
    /// document.
    ///
    /// Detached nodes keep their slots, so a group that grows back reuses
    /// them instead of creating new ones.
    pub fn end_group<L: Listener>(&mut self, doc: &mut Document<L>, parent: NodeId) -> Result<usize> {
        let shadow = self.shadow(parent);
        let Some(group) = shadow.group.take() else {
            return Ok(0);
        };
        let keep = shadow.last_visited.map_or(0, |v| v + 1);
        let surplus: Vec<NodeId> = match shadow.slots.get(group) {
            Some(Some(Slot::Group(list))) => list.iter().skip(keep).flatten().copied().collect(),
            _ => Vec::new(),
        };

        let mut detached = 0;
        for node in surplus {
            let Some(child) = self.shadows.get_mut(&node).filter(|s| s.attached) else {
                continue;
            };
            child.attached = false;
            doc.remove(node)?;
            detached += 1;
        }
        if detached > 0 {
            tracing::trace!(parent = parent.index(), kept = keep, detached, "group shrunk");
        }
        Ok(detached)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Bind `listener` to `event` on `node`.
    ///
    /// Binding the listener already bound is a no-op. A different listener
    /// replaces the old one; None just unbinds. Returns true if anything changed.
    pub fn bind_event<L: Listener>(
        &mut self,
        doc: &mut Document<L>,
        node: NodeId,
        event: &str,
        listener: Option<L>,
    ) -> Result<bool> {
        let current = doc.listener(node, event)?;
        match (current, &listener) {
            (Some(current), Some(new)) if current.same_listener(new) => return Ok(false),
            (None, None) => return Ok(false),
            _ => {}
        }
        doc.remove_event_listener(node, event)?;
        if let Some(listener) = listener {
            doc.add_event_listener(node, event, listener)?;
        }
        Ok(true)
    }
}
