//! Similarity measures and their registry.
//!
//! A [`Measure`] scores a pair of property value sets in [0, 1]. Measures are
//! black boxes to the rest of the engine: the executor and the learner only
//! ever address them by name through the [`MeasureCatalog`].
//!
//! Multi-valued properties score as the best pair across the value cross
//! product, so an instance with aliases matches on its best alias.

pub mod numeric;
pub mod string;

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::ExecError;

pub use numeric::NumericMeasure;
pub use string::{ExactMeasure, JaccardMeasure, LevenshteinMeasure, TrigramMeasure};

/// A similarity measure over property value sets.
///
/// Implementations must be pure: identical inputs yield identical scores,
/// and every score lies in [0, 1].
pub trait Measure: Send + Sync {
    /// Similarity of two value sets in [0, 1].
    fn score(&self, a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64;

    /// Registry name of this measure.
    fn name(&self) -> &'static str;
}

/// Name-keyed registry of similarity measures.
///
/// `Default` registers the built-ins; callers can `register` their own
/// measures under new names (re-registering a name replaces the measure).
pub struct MeasureCatalog {
    measures: DashMap<String, Arc<dyn Measure>>,
}

impl MeasureCatalog {
    /// Create an empty catalog.
    pub fn empty() -> Self {
        Self {
            measures: DashMap::new(),
        }
    }

    /// Register a measure under its own name.
    pub fn register(&self, measure: Arc<dyn Measure>) {
        self.measures.insert(measure.name().to_string(), measure);
    }

    /// Look up a measure by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Measure>, ExecError> {
        self.measures
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ExecError::UnknownMeasure {
                name: name.to_string(),
            })
    }

    /// Whether a measure with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.measures.contains_key(name)
    }

    /// All registered measure names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.measures.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for MeasureCatalog {
    fn default() -> Self {
        let catalog = Self::empty();
        catalog.register(Arc::new(ExactMeasure));
        catalog.register(Arc::new(LevenshteinMeasure));
        catalog.register(Arc::new(JaccardMeasure));
        catalog.register(Arc::new(TrigramMeasure));
        catalog.register(Arc::new(NumericMeasure));
        catalog
    }
}

impl std::fmt::Debug for MeasureCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasureCatalog")
            .field("measures", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_builtins() {
        let catalog = MeasureCatalog::default();
        for name in ["exact", "levenshtein", "jaccard", "trigram", "numeric"] {
            assert!(catalog.contains(name), "missing builtin {name}");
        }
    }

    #[test]
    fn unknown_measure_is_an_error() {
        let catalog = MeasureCatalog::default();
        let result = catalog.get("soundex");
        assert!(matches!(result, Err(ExecError::UnknownMeasure { .. })));
    }

    #[test]
    fn names_are_sorted() {
        let catalog = MeasureCatalog::default();
        let names = catalog.names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
