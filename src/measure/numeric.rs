//! Numeric similarity.

use std::collections::BTreeSet;

use super::Measure;

/// Relative-difference similarity for numeric values.
///
/// Scores `1 - |x - y| / max(|x|, |y|, 1)`, clamped to [0, 1], over the best
/// parseable value pair. A side with no parseable number scores 0.
pub struct NumericMeasure;

impl Measure for NumericMeasure {
    fn score(&self, a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
        let xs = parse_all(a);
        let ys = parse_all(b);
        if xs.is_empty() || ys.is_empty() {
            return 0.0;
        }

        let mut best: f64 = 0.0;
        for &x in &xs {
            for &y in &ys {
                let scale = x.abs().max(y.abs()).max(1.0);
                let score = (1.0 - (x - y).abs() / scale).clamp(0.0, 1.0);
                best = best.max(score);
            }
        }
        best
    }

    fn name(&self) -> &'static str {
        "numeric"
    }
}

fn parse_all(values: &BTreeSet<String>) -> Vec<f64> {
    values
        .iter()
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}
