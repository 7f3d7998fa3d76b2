//! Mapping: the scored bipartite result set of a matching run.
//!
//! A [`Mapping`] stores `source URI → target URI → confidence` with the
//! invariant that every stored confidence is strictly positive. [`Mapping::add`]
//! silently drops non-positive entries, so the invariant holds by construction.
//!
//! Iteration order is canonical: `(source, target)` lexicographic. Every
//! consumer that folds over a mapping (set algebra, serialization, quality
//! evaluation) uses this one order, so results never depend on which worker
//! produced which entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scored source → target correspondences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    links: BTreeMap<String, BTreeMap<String, f64>>,
    size: usize,
}

impl Mapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link. Entries with confidence ≤ 0 are dropped; re-adding a pair
    /// overwrites its confidence.
    pub fn add(&mut self, source: impl Into<String>, target: impl Into<String>, confidence: f64) {
        if confidence <= 0.0 {
            return;
        }
        let previous = self
            .links
            .entry(source.into())
            .or_default()
            .insert(target.into(), confidence);
        if previous.is_none() {
            self.size += 1;
        }
    }

    /// Confidence of a pair, 0.0 when absent.
    pub fn confidence(&self, source: &str, target: &str) -> f64 {
        self.links
            .get(source)
            .and_then(|targets| targets.get(target))
            .copied()
            .unwrap_or(0.0)
    }

    /// Whether the pair is present.
    pub fn contains(&self, source: &str, target: &str) -> bool {
        self.confidence(source, target) > 0.0
    }

    /// Number of links.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the mapping holds no links.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Iterate `(source, target, confidence)` in canonical sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.links.iter().flat_map(|(source, targets)| {
            targets
                .iter()
                .map(move |(target, confidence)| (source.as_str(), target.as_str(), *confidence))
        })
    }

    /// Distinct source URIs.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(|s| s.as_str())
    }

    /// Number of distinct target URIs.
    pub fn target_count(&self) -> usize {
        let mut targets: Vec<&str> = self
            .links
            .values()
            .flat_map(|t| t.keys().map(|s| s.as_str()))
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets.len()
    }

    /// Union: every pair of either side, keeping the maximum confidence.
    pub fn union(&self, other: &Mapping) -> Mapping {
        let mut result = self.clone();
        for (source, target, confidence) in other.iter() {
            if confidence > result.confidence(source, target) {
                result.add(source, target, confidence);
            }
        }
        result
    }

    /// Intersection: pairs present in both sides, keeping the minimum confidence.
    pub fn intersection(&self, other: &Mapping) -> Mapping {
        let mut result = Mapping::new();
        for (source, target, confidence) in self.iter() {
            let theirs = other.confidence(source, target);
            if theirs > 0.0 {
                result.add(source, target, confidence.min(theirs));
            }
        }
        result
    }

    /// Difference: pairs of `self` absent from `other`, keeping `self`'s confidence.
    pub fn difference(&self, other: &Mapping) -> Mapping {
        let mut result = Mapping::new();
        for (source, target, confidence) in self.iter() {
            if !other.contains(source, target) {
                result.add(source, target, confidence);
            }
        }
        result
    }

    /// Pairs meeting a confidence threshold.
    pub fn filter_threshold(&self, threshold: f64) -> Mapping {
        let mut result = Mapping::new();
        for (source, target, confidence) in self.iter() {
            if confidence >= threshold {
                result.add(source, target, confidence);
            }
        }
        result
    }

    /// Copy of the positive links. By the mapping invariant this is every
    /// link, but callers handling externally supplied labels (oracle answers,
    /// training files) use it to strip confirmed non-matches.
    pub fn positives(&self) -> Mapping {
        let mut result = Mapping::new();
        for (source, target, confidence) in self.iter() {
            result.add(source, target, confidence);
        }
        result
    }
}

impl std::fmt::Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "mapping ({} links)", self.size)?;
        for (source, target, confidence) in self.iter() {
            writeln!(f, "  {source} -> {target} ({confidence:.4})")?;
        }
        Ok(())
    }
}
