//! Active-learning selector: find the most contested candidate pairs.
//!
//! Given the distinct mappings produced by a population's specifications,
//! the selector scores every pair by how much the specifications disagree
//! about it and returns the most controversial pairs as oracle questions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::LearnError;
use crate::mapping::Mapping;

/// A candidate pair for the oracle, with one representative confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleQuestion {
    pub source: String,
    pub target: String,
    /// Mean confidence across the candidate mappings (absent counts as 0).
    pub similarity: f64,
}

/// The `size` most contested pairs across the candidate mappings.
///
/// A pair's controversy is the spread (max − min) of its confidence across
/// all mappings, where absence counts as confidence 0. Ties break by
/// `(source, target)` order, so the result is deterministic. Fails with
/// [`LearnError::InsufficientDiversity`] when fewer than two mappings are
/// supplied — with one voice there is no disagreement to measure.
pub fn select_controversial(
    candidate_mappings: &[Mapping],
    size: usize,
) -> Result<Vec<OracleQuestion>, LearnError> {
    if candidate_mappings.len() < 2 {
        return Err(LearnError::InsufficientDiversity {
            available: candidate_mappings.len(),
        });
    }

    let mut pairs: BTreeSet<(&str, &str)> = BTreeSet::new();
    for mapping in candidate_mappings {
        for (source, target, _) in mapping.iter() {
            pairs.insert((source, target));
        }
    }

    let mut scored: Vec<(f64, OracleQuestion)> = pairs
        .into_iter()
        .map(|(source, target)| {
            let confidences: Vec<f64> = candidate_mappings
                .iter()
                .map(|mapping| mapping.confidence(source, target))
                .collect();
            let max = confidences.iter().copied().fold(f64::MIN, f64::max);
            let min = confidences.iter().copied().fold(f64::MAX, f64::min);
            let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
            (
                max - min,
                OracleQuestion {
                    source: source.to_string(),
                    target: target.to_string(),
                    similarity: mean,
                },
            )
        })
        .collect();

    // Highest spread first; pair order breaks ties (pairs are pre-sorted, and
    // the sort is stable).
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    Ok(scored
        .into_iter()
        .take(size)
        .map(|(_, question)| question)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_of(links: &[(&str, &str, f64)]) -> Mapping {
        let mut m = Mapping::new();
        for (s, t, c) in links {
            m.add(*s, *t, *c);
        }
        m
    }

    #[test]
    fn maximal_spread_wins() {
        let mappings = vec![
            mapping_of(&[("s1", "t1", 0.1), ("s2", "t2", 0.5)]),
            mapping_of(&[("s1", "t1", 0.9), ("s2", "t2", 0.5)]),
            mapping_of(&[("s1", "t1", 0.5), ("s2", "t2", 0.5)]),
        ];
        let questions = select_controversial(&mappings, 1).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].source, "s1");
        assert_eq!(questions[0].target, "t1");
        assert!((questions[0].similarity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn absence_counts_as_zero_confidence() {
        let mappings = vec![
            mapping_of(&[("s1", "t1", 0.6)]),
            mapping_of(&[("s2", "t2", 0.3)]),
        ];
        let questions = select_controversial(&mappings, 2).unwrap();
        // s1/t1 spread 0.6 beats s2/t2 spread 0.3.
        assert_eq!(questions[0].source, "s1");
        assert_eq!(questions[1].source, "s2");
        assert!((questions[0].similarity - 0.3).abs() < 1e-9);
    }

    #[test]
    fn ties_break_by_pair_order() {
        let mappings = vec![
            mapping_of(&[("s2", "t2", 0.4), ("s1", "t1", 0.4)]),
            mapping_of(&[]),
        ];
        let questions = select_controversial(&mappings, 2).unwrap();
        assert_eq!(questions[0].source, "s1");
        assert_eq!(questions[1].source, "s2");
    }

    #[test]
    fn size_truncates() {
        let mappings = vec![
            mapping_of(&[("s1", "t1", 0.9), ("s2", "t2", 0.2)]),
            mapping_of(&[]),
        ];
        let questions = select_controversial(&mappings, 1).unwrap();
        assert_eq!(questions.len(), 1);
    }

    #[test]
    fn single_mapping_is_insufficient() {
        let mappings = vec![mapping_of(&[("s1", "t1", 0.9)])];
        let result = select_controversial(&mappings, 3);
        assert!(matches!(
            result,
            Err(LearnError::InsufficientDiversity { available: 1 })
        ));
    }
}
