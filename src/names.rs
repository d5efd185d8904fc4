//! Property name arrays returned by `copy_property_names`.

use std::sync::Arc;

/// Immutable list of property names. Cloning retains the same storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyNameArray {
    names: Arc<[String]>,
}

impl PropertyNameArray {
    pub(crate) fn new(names: Vec<String>) -> Self {
        PropertyNameArray {
            names: names.into(),
        }
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.names)
    }
}
