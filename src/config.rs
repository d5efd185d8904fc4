//! Runtime configuration for a [`JsContext`](crate::JsContext).

use serde::{Deserialize, Serialize};

use crate::error::JscError;

/// Engine limits applied when a context is created.
///
/// Every field is optional; an absent field leaves the engine default in
/// place. Configurations are usually embedded in a host's own settings file:
///
/// ```
/// use jscore_compat::ContextConfig;
///
/// let config = ContextConfig::from_json(r#"{ "memory_limit": 33554432 }"#).unwrap();
/// assert_eq!(config.memory_limit, Some(32 * 1024 * 1024));
/// assert_eq!(config.gc_threshold, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Upper bound on engine heap bytes
    pub memory_limit: Option<usize>,
    /// Allocation volume that triggers an automatic cycle collection
    pub gc_threshold: Option<usize>,
    /// Maximum native stack the engine may use, in bytes
    pub max_stack_size: Option<usize>,
}

impl ContextConfig {
    pub fn from_json(json: &str) -> Result<Self, JscError> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn apply(&self, runtime: &rquickjs::Runtime) {
        if let Some(limit) = self.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(threshold) = self.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        if let Some(size) = self.max_stack_size {
            runtime.set_max_stack_size(size);
        }
    }
}
