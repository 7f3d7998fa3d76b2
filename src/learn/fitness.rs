//! Fitness functions for the evolutionary search.
//!
//! Raw fitness is a cost: `1 − F_β`, lower is better. The supervised variant
//! scores a specification's mapping against labeled training links; the
//! unsupervised variant estimates quality without ground truth via a
//! reference-free pseudo-F-measure.
//!
//! Both variants cache executed mappings and fitness values per canonical
//! specification text. The caches are written concurrently by parallel
//! evaluations; a racing miss recomputes the same value and the first insert
//! wins, so redundant work is possible but a corrupted entry is not.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::exec::ExecutionEngine;
use crate::mapping::Mapping;
use crate::spec::LinkSpec;

/// Scores candidate specifications during a learning run.
pub trait FitnessFunction: Send + Sync {
    /// Cost of a specification: `1 − F_β`, lower is better.
    fn raw_fitness(&self, spec: &LinkSpec) -> f64;

    /// The mapping a specification produces, from cache when possible.
    fn mapping_for(&self, spec: &LinkSpec) -> Arc<Mapping>;
}

/// F_β from precision and recall, 0 when both signals vanish.
fn f_beta(precision: f64, recall: f64, beta: f64) -> f64 {
    let beta_sq = beta * beta;
    let denominator = beta_sq * precision + recall;
    if denominator <= 0.0 {
        return 0.0;
    }
    (1.0 + beta_sq) * precision * recall / denominator
}

/// Shared execute-and-cache plumbing.
struct MappingCache {
    engine: Arc<ExecutionEngine>,
    mappings: DashMap<String, Arc<Mapping>>,
}

impl MappingCache {
    fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            engine,
            mappings: DashMap::new(),
        }
    }

    fn mapping(&self, spec: &LinkSpec) -> Arc<Mapping> {
        let key = spec.to_string();
        if let Some(cached) = self.mappings.get(&key) {
            return Arc::clone(cached.value());
        }

        let mapping = match self.engine.execute(spec) {
            Ok(mapping) => mapping,
            Err(error) => {
                // The search only generates valid specs; an execution error
                // here means a degenerate individual, which scores worst.
                tracing::warn!(%error, spec = %spec, "specification failed to execute");
                Mapping::new()
            }
        };
        let entry = self
            .mappings
            .entry(key)
            .or_insert_with(|| Arc::new(mapping));
        Arc::clone(entry.value())
    }
}

// ---------------------------------------------------------------------------
// Supervised F-measure
// ---------------------------------------------------------------------------

/// F_β against labeled training links.
///
/// Candidate links are trimmed to pairs whose source and target both occur in
/// the training data before scoring, so discoveries outside the labeled
/// region are not punished as false positives.
pub struct SupervisedFitness {
    cache: MappingCache,
    fitness_cache: DashMap<String, f64>,
    reference: Mapping,
    known_sources: BTreeSet<String>,
    known_targets: BTreeSet<String>,
    beta: f64,
}

impl SupervisedFitness {
    /// Build from training links (positives only, per the mapping invariant).
    pub fn new(engine: Arc<ExecutionEngine>, training: &Mapping, beta: f64) -> Self {
        let mut fitness = Self {
            cache: MappingCache::new(engine),
            fitness_cache: DashMap::new(),
            reference: Mapping::new(),
            known_sources: BTreeSet::new(),
            known_targets: BTreeSet::new(),
            beta,
        };
        fitness.add_to_reference(training);
        fitness
    }

    /// Extend the reference with further labeled links (oracle answers).
    ///
    /// Invalidates cached fitness values, which were computed against the old
    /// reference.
    pub fn add_to_reference(&mut self, training: &Mapping) {
        for (source, target, confidence) in training.positives().iter() {
            self.reference.add(source, target, confidence);
        }
        for (source, target, _) in training.iter() {
            self.known_sources.insert(source.to_string());
            self.known_targets.insert(target.to_string());
        }
        self.fitness_cache.clear();
    }

    /// Number of reference links.
    pub fn reference_size(&self) -> usize {
        self.reference.size()
    }

    /// Restrict a mapping to pairs the training data knows about.
    fn trim_to_known(&self, mapping: &Mapping) -> Mapping {
        let mut trimmed = Mapping::new();
        for (source, target, confidence) in mapping.iter() {
            if self.known_sources.contains(source) && self.known_targets.contains(target) {
                trimmed.add(source, target, confidence);
            }
        }
        trimmed
    }

    fn f_measure(&self, mapping: &Mapping) -> f64 {
        let trimmed = self.trim_to_known(mapping);
        let true_positives = trimmed
            .iter()
            .filter(|(source, target, _)| self.reference.contains(source, target))
            .count();

        let precision = if trimmed.size() == 0 {
            0.0
        } else {
            true_positives as f64 / trimmed.size() as f64
        };
        let recall = if self.reference.size() == 0 {
            0.0
        } else {
            true_positives as f64 / self.reference.size() as f64
        };
        f_beta(precision, recall, self.beta)
    }
}

impl FitnessFunction for SupervisedFitness {
    fn raw_fitness(&self, spec: &LinkSpec) -> f64 {
        let key = spec.to_string();
        if let Some(cached) = self.fitness_cache.get(&key) {
            return *cached.value();
        }
        let fitness = 1.0 - self.f_measure(&self.cache.mapping(spec));
        *self.fitness_cache.entry(key).or_insert(fitness)
    }

    fn mapping_for(&self, spec: &LinkSpec) -> Arc<Mapping> {
        self.cache.mapping(spec)
    }
}

// ---------------------------------------------------------------------------
// Unsupervised pseudo-F-measure
// ---------------------------------------------------------------------------

/// Reference-free quality estimate.
///
/// Pseudo-precision rewards mappings whose sources link few targets
/// (`|mapped sources| / |links|`); pseudo-recall rewards coverage of both
/// stores (`(|mapped sources| + |mapped targets|) / (|S| + |T|)`).
pub struct PseudoFitness {
    cache: MappingCache,
    fitness_cache: DashMap<String, f64>,
    source_count: usize,
    target_count: usize,
    beta: f64,
}

impl PseudoFitness {
    pub fn new(engine: Arc<ExecutionEngine>, beta: f64) -> Self {
        let source_count = engine.source().len();
        let target_count = engine.target().len();
        Self {
            cache: MappingCache::new(engine),
            fitness_cache: DashMap::new(),
            source_count,
            target_count,
            beta,
        }
    }

    fn pseudo_f_measure(&self, mapping: &Mapping) -> f64 {
        if mapping.is_empty() {
            return 0.0;
        }
        let mapped_sources = mapping.sources().count();
        let mapped_targets = mapping.target_count();

        let precision = mapped_sources as f64 / mapping.size() as f64;
        let recall =
            (mapped_sources + mapped_targets) as f64 / (self.source_count + self.target_count) as f64;
        f_beta(precision, recall.min(1.0), self.beta)
    }
}

impl FitnessFunction for PseudoFitness {
    fn raw_fitness(&self, spec: &LinkSpec) -> f64 {
        let key = spec.to_string();
        if let Some(cached) = self.fitness_cache.get(&key) {
            return *cached.value();
        }
        let fitness = 1.0 - self.pseudo_f_measure(&self.cache.mapping(spec));
        *self.fitness_cache.entry(key).or_insert(fitness)
    }

    fn mapping_for(&self, spec: &LinkSpec) -> Arc<Mapping> {
        self.cache.mapping(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::KeyFunction;
    use crate::instance::Instance;
    use crate::measure::MeasureCatalog;
    use crate::store::EntityStore;

    fn test_engine() -> Arc<ExecutionEngine> {
        let mut source = EntityStore::new();
        source
            .insert(Instance::new("urn:s1").with_value("name", "alice"))
            .unwrap();
        source
            .insert(Instance::new("urn:s2").with_value("name", "bob"))
            .unwrap();
        let mut target = EntityStore::new();
        target
            .insert(Instance::new("urn:t1").with_value("name", "alice"))
            .unwrap();
        target
            .insert(Instance::new("urn:t2").with_value("name", "bobby"))
            .unwrap();
        Arc::new(ExecutionEngine::new(
            Arc::new(source),
            Arc::new(target),
            Arc::new(MeasureCatalog::default()),
            KeyFunction::TokenPrefix {
                property: "name".into(),
                len: 1,
            },
        ))
    }

    fn training() -> Mapping {
        let mut m = Mapping::new();
        m.add("urn:s1", "urn:t1", 1.0);
        m.add("urn:s2", "urn:t2", 1.0);
        m
    }

    #[test]
    fn perfect_spec_has_zero_cost() {
        let fitness = SupervisedFitness::new(test_engine(), &training(), 1.0);
        let spec = LinkSpec::atom("levenshtein", "name", "name", 0.55);
        let raw = fitness.raw_fitness(&spec);
        assert!(raw.abs() < 1e-9, "expected 0 cost, got {raw}");
    }

    #[test]
    fn empty_mapping_has_worst_cost() {
        let fitness = SupervisedFitness::new(test_engine(), &training(), 1.0);
        let spec = LinkSpec::atom("jaccard", "missing", "name", 0.9);
        assert_eq!(fitness.raw_fitness(&spec), 1.0);
    }

    #[test]
    fn partial_recall_costs_more_than_full() {
        let fitness = SupervisedFitness::new(test_engine(), &training(), 1.0);
        // Matches only alice.
        let narrow = LinkSpec::atom("exact", "name", "name", 1.0);
        // Matches alice and bob/bobby.
        let wide = LinkSpec::atom("levenshtein", "name", "name", 0.55);
        assert!(fitness.raw_fitness(&narrow) > fitness.raw_fitness(&wide));
    }

    #[test]
    fn fitness_is_cached_and_stable() {
        let fitness = SupervisedFitness::new(test_engine(), &training(), 1.0);
        let spec = LinkSpec::atom("levenshtein", "name", "name", 0.55);
        let first = fitness.raw_fitness(&spec);
        let second = fitness.raw_fitness(&spec);
        assert_eq!(first, second);
    }

    #[test]
    fn adding_reference_invalidates_cache() {
        let mut fitness = SupervisedFitness::new(test_engine(), &training(), 1.0);
        let spec = LinkSpec::atom("exact", "name", "name", 1.0);
        let before = fitness.raw_fitness(&spec);

        let mut more = Mapping::new();
        more.add("urn:s2", "urn:t1", 1.0);
        fitness.add_to_reference(&more);
        let after = fitness.raw_fitness(&spec);
        assert_ne!(before, after);
        assert_eq!(fitness.reference_size(), 3);
    }

    #[test]
    fn pseudo_fitness_prefers_covering_one_to_one_mappings() {
        let engine = test_engine();
        let fitness = PseudoFitness::new(Arc::clone(&engine), 1.0);
        // Covers both sources one-to-one.
        let good = LinkSpec::atom("levenshtein", "name", "name", 0.55);
        // Covers one source only.
        let sparse = LinkSpec::atom("exact", "name", "name", 1.0);
        assert!(fitness.raw_fitness(&good) < fitness.raw_fitness(&sparse));
        // No links at all is worst.
        let empty = LinkSpec::atom("jaccard", "missing", "name", 0.9);
        assert_eq!(fitness.raw_fitness(&empty), 1.0);
    }

    #[test]
    fn f_beta_degenerate_cases() {
        assert_eq!(f_beta(0.0, 0.0, 1.0), 0.0);
        assert!((f_beta(1.0, 1.0, 1.0) - 1.0).abs() < 1e-9);
        assert!((f_beta(0.5, 0.5, 1.0) - 0.5).abs() < 1e-9);
        // Beta 2 weighs recall higher.
        assert!(f_beta(0.2, 0.8, 2.0) > f_beta(0.2, 0.8, 1.0));
    }
}
