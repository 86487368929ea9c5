//! # spark-bridge
//!
//! Reactive component runtime for compiled declarative-UI modules.
//!
//! A component module is compiled ahead of time and exposes a flat set of
//! entry points per component kind. This crate is the host side of that
//! boundary plus the reactive machinery both sides share.
//!
//! ## Architecture
//!
//! ```text
//! raw props → sanitize (manifest) → handle → module constructor
//!                                              │
//!     property writes → ReactiveObject staged → commit (next frame) → render
//!                                                                      │
//!                               Reconciler slots → Document mutations ←┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Value kinds, coercion, flattening and structural equality
//! - [`reactive`] - Reactive objects and collections, frame scheduler
//! - [`reconciler`] - Host document and the position-keyed slot reconciler
//! - [`bridge`] - Handle table, linear memory, manifests, the [`Runtime`]
//! - [`guest`] - Module-side helpers and manifest-driven component definitions

pub mod bridge;
pub mod config;
pub mod error;
pub mod guest;
pub mod reactive;
pub mod reconciler;
pub mod types;

// Re-export commonly used items
pub use bridge::{
    Capability, ComponentKind, Handle, HostFunction, HostValue, InstanceId, Module, Property, Runtime,
    Word, NULL_HANDLE,
};

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};

pub use reactive::{CoerceContext, FrameScheduler, ReactiveCollection, ReactiveObject};

pub use reconciler::{Document, NodeId, Reconciler};

pub use types::{coerce, default_value, ObjectSchema, Value, ValueKind};
