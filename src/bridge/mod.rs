//! Host side of the module boundary.
//!
//! A compiled component module talks to the host only through integers:
//!
//! - **handles** reference host values ([`HandleTable`])
//! - **pointers** address the shared [`LinearMemory`]
//! - **exports** are the module's entry points ([`Module`])
//! - **imports** are the `Runtime` methods the module calls back into
//!
//! [`Runtime`] ties these together with loaded component kinds, their
//! instances, the document and its reconciler.

mod component;
mod handles;
mod host_value;
mod imports;
pub mod manifest;
mod memory;
mod module;
mod runtime;

pub use component::{CallbackProperty, ComponentKind, InstanceId, Property, SequenceProperty};
pub use handles::{Capability, FALSE_HANDLE, Handle, HandleTable, NULL_HANDLE, TRUE_HANDLE};
pub use host_value::{HostFunction, HostValue};
pub use manifest::{sanitize, sanitize_props};
pub use memory::LinearMemory;
pub use module::{DISPATCH_BOUND_CALLBACK, ExportFn, Module, Word, arg};
pub use runtime::{RenderRequests, Runtime};
