//! Tree reconciler - position-keyed slots over a host document.
//!
//! - [`Document`] is the live node tree a render pass mutates.
//! - [`Reconciler`] holds per-node shadow state and turns a declared shape
//!   into the minimal set of creations, insertions and removals.

mod document;
mod slots;

pub use document::{Document, Listener, MutationStats, NodeId, NodeKind};
pub use slots::Reconciler;
