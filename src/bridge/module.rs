//! Compiled component module - its export table.
//!
//! A module is a set of named entry points. Every argument and result is a
//! [`Word`]: a handle, a pointer, a length, an index or an instance
//! reference. Entry points receive the [`Runtime`] so they can call back
//! into the host imports.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use crate::error::Result;

/// One machine word crossing the boundary.
pub type Word = u32;

/// An exported entry point.
pub type ExportFn = Rc<dyn Fn(&mut Runtime, &[Word]) -> Result<Word>>;

/// Name of the module-wide export that runs a callback bound with
/// [`Runtime::bind_callback`].
pub const DISPATCH_BOUND_CALLBACK: &str = "dispatch_bound_callback";

/// Export table of a compiled module.
#[derive(Clone, Default)]
pub struct Module {
    exports: HashMap<String, ExportFn>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point, replacing any export of the same name.
    pub fn export(
        &mut self,
        name: impl Into<String>,
        entry: impl Fn(&mut Runtime, &[Word]) -> Result<Word> + 'static,
    ) -> &mut Self {
        self.exports.insert(name.into(), Rc::new(entry));
        self
    }

    pub fn get(&self, name: &str) -> Option<ExportFn> {
        self.exports.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Export names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("exports", &self.names()).finish()
    }
}

/// Argument `index` of an export call, or 0 if the caller passed fewer.
pub fn arg(args: &[Word], index: usize) -> Word {
    args.get(index).copied().unwrap_or(0)
}
