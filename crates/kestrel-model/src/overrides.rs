//! Component configuration overrides
//!
//! Steps append key/value overrides per cluster component; the cluster
//! configuration layer consumes the collected list.

use std::collections::BTreeMap;

/// One configuration override entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideEntry {
    pub key: String,
    pub value: String,
}

/// Overrides grouped by component name
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComponentOverrides {
    components: BTreeMap<String, Vec<OverrideEntry>>,
}

impl ComponentOverrides {
    /// Append entries for a component, keeping earlier entries
    pub fn append<I>(&mut self, component: &str, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.components
            .entry(component.to_string())
            .or_default()
            .extend(entries.into_iter().map(|(key, value)| OverrideEntry { key, value }));
    }

    /// Entries for a component, empty if none were appended
    pub fn for_component(&self, component: &str) -> &[OverrideEntry] {
        self.components
            .get(component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Value of a key within a component
    pub fn get(&self, component: &str, key: &str) -> Option<&str> {
        self.for_component(component)
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.components.values().all(Vec::is_empty)
    }
}
