//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Size of one linear memory page.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Construction-time settings for a [`crate::Runtime`].
///
/// # Example
///
/// ```
/// use spark_bridge::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json_str(r#"{ "export_separator": "::" }"#).unwrap();
/// assert_eq!(config.export_separator, "::");
/// assert_eq!(config.initial_handle_capacity, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Handle table slots reserved up front.
    pub initial_handle_capacity: usize,
    /// Joins a component kind name and an entry point name (`Counter__new_component`).
    pub export_separator: String,
    /// Initial linear memory size, in 64 KiB pages. Memory grows on demand.
    pub memory_pages: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_handle_capacity: 64,
            export_separator: "__".to_string(),
            memory_pages: 1,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON config document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RuntimeError::InvalidConfig(e.to_string()))
    }

    /// Full export name for an entry point of a component kind.
    pub fn export_name(&self, kind: &str, entry: &str) -> String {
        format!("{kind}{}{entry}", self.export_separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.memory_pages, 1);
        assert_eq!(config.export_name("Counter", "new_component"), "Counter__new_component");
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(RuntimeConfig::from_json_str(r#"{ "bogus": 1 }"#).is_err());
    }
}
