//! Named simulator variables
//!
//! Variables carry a leading `$` (`$power`, `$temperature`). A variable that
//! changes gradually also has a `<name>_target` entry; the physics loop moves
//! the current value toward it. Unknown names read as 0.

use std::collections::BTreeMap;

/// Suffix appended to a variable name to form its target entry
pub const TARGET_SUFFIX: &str = "_target";

/// Name of the target entry for `name`
#[inline]
pub fn target_name(name: &str) -> String {
    format!("{name}{TARGET_SUFFIX}")
}

/// Variable name → value, including `_target` companions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableTable {
    values: BTreeMap<String, f64>,
}

impl VariableTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, 0 when unknown
    #[inline]
    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    /// Whether the variable has been set
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Set the current value
    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    /// Target value, 0 when unknown
    #[inline]
    pub fn target(&self, name: &str) -> f64 {
        self.get(&target_name(name))
    }

    /// Set the target value only
    pub fn set_target(&mut self, name: &str, value: f64) {
        self.values.insert(target_name(name), value);
    }

    /// Set current and target together so nothing ramps
    pub fn set_both(&mut self, name: &str, value: f64) {
        self.set(name, value);
        self.set_target(name, value);
    }

    /// Make sure `name` exists and has a target equal to its current value
    pub fn track(&mut self, name: &str) {
        let current = self.get(name);
        self.values.entry(name.to_string()).or_insert(current);
        self.values.entry(target_name(name)).or_insert(current);
    }

    /// Iterate all entries by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for VariableTable {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
