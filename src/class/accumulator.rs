//! Names gathered during one enumeration walk.

use std::collections::VecDeque;

use indexmap::IndexSet;

/// Collects property names from enumeration hooks.
///
/// Names go in at the front and are drained from the back, so the merge sees
/// them in the order they were added. An accumulator only lives for a single
/// enumeration.
#[derive(Debug, Default)]
pub struct PropertyNameAccumulator {
    names: VecDeque<String>,
}

impl PropertyNameAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn add_name(&mut self, name: impl Into<String>) {
        self.names.push_front(name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn pop(&mut self) -> Option<String> {
        self.names.pop_back()
    }
}

/// Merged result of an enumeration walk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PropertyNames {
    /// Integer-like names, ascending, without repeats
    pub indices: Vec<u32>,
    /// Remaining names in first-seen order
    pub names: Vec<String>,
}

impl PropertyNames {
    /// Drain an accumulator, dropping repeated names.
    ///
    /// A name whose canonical form is an index string ("7") is reported only in
    /// `indices`. Names that merely parse as an index (" 7", "7.0") are reported
    /// in both lists, since script code sees them as distinct keys.
    pub fn merge(mut accumulator: PropertyNameAccumulator) -> Self {
        let mut seen = IndexSet::with_capacity(accumulator.len());
        while let Some(name) = accumulator.pop() {
            seen.insert(name);
        }

        let mut merged = PropertyNames::default();
        for name in seen {
            match parse_index(&name) {
                Some(index) => {
                    merged.indices.push(index);
                    if index.to_string() != name {
                        merged.names.push(name);
                    }
                }
                None => merged.names.push(name),
            }
        }
        merged.indices.sort_unstable();
        merged.indices.dedup();
        merged
    }

    /// Every name as a property key, indices first.
    pub fn into_keys(self) -> Vec<String> {
        self.indices
            .iter()
            .map(u32::to_string)
            .chain(self.names)
            .collect()
    }
}

/// Parse a property name as an array index.
///
/// Accepts names that, once trimmed, read as a finite non-negative integer no
/// larger than `u32::MAX`.
pub fn parse_index(name: &str) -> Option<u32> {
    let number: f64 = name.trim().parse().ok()?;
    if number.is_finite() && number.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&number)
    {
        Some(number as u32)
    } else {
        None
    }
}
