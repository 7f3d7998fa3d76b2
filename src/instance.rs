//! Core instance type for the lodestone engine.
//!
//! An [`Instance`] is one entity of a dataset: a URI plus a multi-valued
//! property map. Instances are immutable once loaded into an
//! [`EntityStore`](crate::store::EntityStore) and owned exclusively by it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One entity of a dataset: a URI plus its property values.
///
/// Property values are kept in a `BTreeSet`, so duplicates collapse and
/// iteration order is canonical regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique identifier within the owning store.
    pub uri: String,
    /// Property name → set of values.
    pub properties: BTreeMap<String, BTreeSet<String>>,
}

impl Instance {
    /// Create an instance with no properties.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style: add one value to a property.
    pub fn with_value(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_value(property, value);
        self
    }

    /// Add one value to a property.
    pub fn add_value(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.properties
            .entry(property.into())
            .or_default()
            .insert(value.into());
    }

    /// Values of a property, if the instance carries it.
    ///
    /// An empty value set counts as absent.
    pub fn values(&self, property: &str) -> Option<&BTreeSet<String>> {
        self.properties.get(property).filter(|v| !v.is_empty())
    }

    /// Whether the instance carries a non-empty value set for `property`.
    pub fn has_property(&self, property: &str) -> bool {
        self.values(property).is_some()
    }

    /// All property names of this instance, in canonical order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(|s| s.as_str())
    }
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} properties)", self.uri, self.properties.len())
    }
}
