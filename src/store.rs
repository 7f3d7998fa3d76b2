//! Entity store: indexed instance data for one dataset side.
//!
//! An [`EntityStore`] owns all [`Instance`]s of one side (source or target)
//! of a matching task. It is populated once during loading and read-only for
//! the duration of a run, so the matcher and learner can share it freely
//! without locking.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LodestoneResult, StoreError};
use crate::instance::Instance;

/// All instances of one dataset side, keyed by URI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStore {
    instances: BTreeMap<String, Instance>,
}

impl EntityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance. Errors if the URI is already taken.
    pub fn insert(&mut self, instance: Instance) -> LodestoneResult<()> {
        if self.instances.contains_key(&instance.uri) {
            return Err(StoreError::DuplicateUri {
                uri: instance.uri.clone(),
            }
            .into());
        }
        self.instances.insert(instance.uri.clone(), instance);
        Ok(())
    }

    /// Look up an instance by URI.
    pub fn get(&self, uri: &str) -> Option<&Instance> {
        self.instances.get(uri)
    }

    /// All URIs, in canonical sorted order.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(|s| s.as_str())
    }

    /// All instances, in canonical URI order.
    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Fraction of instances carrying each property, filtered by a minimum
    /// coverage. Used to pick linkage-worthy properties before learning.
    pub fn property_coverage(&self, min_coverage: f64) -> BTreeMap<String, f64> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for instance in self.instances.values() {
            for property in instance.property_names() {
                *counts.entry(property.to_string()).or_default() += 1;
            }
        }

        let total = self.instances.len() as f64;
        counts
            .into_iter()
            .filter_map(|(property, count)| {
                let coverage = count as f64 / total;
                (coverage >= min_coverage).then_some((property, coverage))
            })
            .collect()
    }

    /// Load a store from a JSON file: an array of instances.
    pub fn load_json(path: impl AsRef<Path>) -> LodestoneResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let instances: Vec<Instance> =
            serde_json::from_str(&content).map_err(|e| StoreError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let mut store = Self::new();
        for instance in instances {
            store.insert(instance)?;
        }
        tracing::info!(
            path = %path.display(),
            instances = store.len(),
            "loaded entity store"
        );
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[(&str, &str)]) -> EntityStore {
        let mut store = EntityStore::new();
        for (uri, name) in names {
            store
                .insert(Instance::new(*uri).with_value("name", *name))
                .unwrap();
        }
        store
    }

    #[test]
    fn insert_and_get() {
        let store = store_with(&[("urn:s1", "alice"), ("urn:s2", "bob")]);
        assert_eq!(store.len(), 2);
        assert!(store.get("urn:s1").is_some());
        assert!(store.get("urn:s3").is_none());
    }

    #[test]
    fn duplicate_uri_error() {
        let mut store = store_with(&[("urn:s1", "alice")]);
        let result = store.insert(Instance::new("urn:s1").with_value("name", "bob"));
        assert!(result.is_err());
        assert!(format!("{}", result.unwrap_err()).contains("duplicate"));
    }

    #[test]
    fn uris_are_sorted() {
        let store = store_with(&[("urn:b", "x"), ("urn:a", "y"), ("urn:c", "z")]);
        let uris: Vec<&str> = store.uris().collect();
        assert_eq!(uris, vec!["urn:a", "urn:b", "urn:c"]);
    }

    #[test]
    fn property_coverage_filters_by_minimum() {
        let mut store = store_with(&[("urn:s1", "alice"), ("urn:s2", "bob")]);
        store
            .insert(
                Instance::new("urn:s3")
                    .with_value("name", "carol")
                    .with_value("zip", "04109"),
            )
            .unwrap();

        let coverage = store.property_coverage(0.5);
        assert_eq!(coverage.get("name"), Some(&1.0));
        // "zip" covers only a third of the store.
        assert!(!coverage.contains_key("zip"));

        let all = store.property_coverage(0.0);
        assert!((all["zip"] - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn load_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(
            &path,
            r#"[{"uri": "urn:s1", "properties": {"name": ["alice"]}}]"#,
        )
        .unwrap();

        let store = EntityStore::load_json(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("urn:s1").unwrap().has_property("name"));
    }

    #[test]
    fn load_json_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(EntityStore::load_json(&path).is_err());
    }
}
