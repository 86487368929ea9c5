//! Runtime errors.
//!
//! Every variant here is a fatal internal-contract violation: the operation
//! that produced it stops immediately and the error propagates to the caller.
//! Invalid end-user property values are never reported through this type;
//! sanitization drops them silently (see [`crate::bridge::manifest`]).

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Fatal runtime errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    /// A handle was dereferenced after release, or was never allocated.
    #[error("handle {0} is not live")]
    DanglingHandle(u32),

    /// A handle was dereferenced as a capability it does not carry.
    #[error("handle {handle} is not a {expected}")]
    WrongHandleKind { handle: u32, expected: &'static str },

    /// `commit()` was invoked on a node that is already committing.
    #[error("commit re-entered while already committing")]
    ReentrantCommit,

    /// A component kind is missing a required entry point.
    #[error("\"{kind}\" is not a valid component: missing export `{export}`")]
    InvalidComponent { kind: String, export: String },

    /// A module-level export was needed but not provided.
    #[error("module does not export `{0}`")]
    MissingExport(String),

    /// Coercion was requested for a kind that has no coercion.
    #[error("coercion into {0} is not implemented")]
    UnsupportedKind(String),

    /// A property name outside the declared schema.
    #[error("unknown property `{0}`")]
    UnknownProperty(String),

    /// A pointer/length pair does not fit inside linear memory.
    #[error("memory access out of bounds: {ptr}+{len}")]
    MemoryOutOfBounds { ptr: u32, len: u32 },

    /// Bytes handed across the boundary were not valid UTF-8.
    #[error("string is not valid utf-8")]
    InvalidUtf8,

    /// No string was staged when the module asked to load one.
    #[error("no string staged")]
    NothingStaged,

    /// The serialized property manifest could not be parsed.
    #[error("invalid property manifest: {0}")]
    InvalidManifest(String),

    /// An instance reference that the runtime does not know about.
    #[error("unknown component instance {0}")]
    UnknownInstance(usize),

    /// A reconciler operation on a node with no shadow state.
    #[error("node {0} has no reconciler state")]
    UnknownNode(usize),

    /// A configuration document could not be parsed.
    #[error("invalid runtime config: {0}")]
    InvalidConfig(String),

    /// The module raised a fatal error through the host import.
    #[error("module fault: {0}")]
    ModuleFault(String),
}
