//! Learning of link specifications.
//!
//! The learner searches the space of [`LinkSpec`]s by genetic programming
//! ([`eagle`]), scored by a [`fitness`] function (supervised F-measure or
//! unsupervised pseudo-F-measure), and can ask an oracle to resolve the most
//! contested candidate pairs ([`selector`]).

pub mod eagle;
pub mod fitness;
pub mod genetic;
pub mod selector;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{LearnError, StoreError};
use crate::mapping::Mapping;
use crate::measure::MeasureCatalog;
use crate::spec::LinkSpec;

pub use eagle::Eagle;
pub use selector::OracleQuestion;

/// Learning modes a learner may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MlMode {
    /// Batch learning against a labeled training mapping.
    SupervisedBatch,
    /// Learning without ground truth, against a pseudo-F-measure.
    Unsupervised,
    /// Incremental learning driven by oracle queries alone.
    ActiveLearning,
}

impl std::fmt::Display for MlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MlMode::SupervisedBatch => write!(f, "supervised batch"),
            MlMode::Unsupervised => write!(f, "unsupervised"),
            MlMode::ActiveLearning => write!(f, "active"),
        }
    }
}

/// When an evolutionary run stops, besides exhausting its generation count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationKind {
    /// Run the configured number of generations.
    #[default]
    Generations,
    /// Stop once `termination_value` seconds of wall clock have elapsed.
    Duration,
    /// Stop once the generation best reaches a quality of `termination_value`.
    Quality,
}

/// Parameters of one learning run.
///
/// Passed by value into the learner: no process-wide engine state survives
/// between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnParams {
    /// Number of generations to evolve.
    pub generations: usize,
    /// Individuals per generation.
    pub population_size: usize,
    /// Probability of the mutation operator.
    pub mutation_rate: f64,
    /// Probability of the crossover operator.
    pub crossover_rate: f64,
    /// Probability of plain reproduction.
    pub reproduction_rate: f64,
    /// Beta of the F-measure (1.0 balances precision and recall).
    pub beta: f64,
    /// Oracle questions per supervised round.
    pub inquiry_size: usize,
    /// Carry the all-time best across generations.
    pub preserve_fittest: bool,
    /// Hard wall-clock cap on the run, in seconds.
    pub max_duration_secs: u64,
    /// Termination criterion beyond the generation count.
    pub termination: TerminationKind,
    /// Threshold value for the termination criterion.
    pub termination_value: f64,
    /// RNG seed for reproducible runs. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Source/target property pairs the search may compare.
    pub property_pairs: Vec<(String, String)>,
    /// Measure names the search may draw from.
    pub measures: Vec<String>,
}

impl Default for LearnParams {
    fn default() -> Self {
        Self {
            generations: 10,
            population_size: 20,
            mutation_rate: 0.4,
            crossover_rate: 0.3,
            reproduction_rate: 0.4,
            beta: 1.0,
            inquiry_size: 10,
            preserve_fittest: true,
            max_duration_secs: 60,
            termination: TerminationKind::Generations,
            termination_value: 0.0,
            seed: None,
            property_pairs: Vec::new(),
            measures: vec![
                "exact".into(),
                "levenshtein".into(),
                "jaccard".into(),
                "trigram".into(),
            ],
        }
    }
}

impl LearnParams {
    /// Validate the parameter combination against a measure catalog.
    pub fn validate(&self, catalog: &MeasureCatalog) -> Result<(), LearnError> {
        if self.generations == 0 {
            return Err(LearnError::Configuration {
                message: "generations must be at least 1".into(),
            });
        }
        if self.population_size == 0 {
            return Err(LearnError::Configuration {
                message: "population_size must be at least 1".into(),
            });
        }
        for (name, rate) in [
            ("mutation_rate", self.mutation_rate),
            ("crossover_rate", self.crossover_rate),
            ("reproduction_rate", self.reproduction_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(LearnError::Configuration {
                    message: format!("{name} must be in [0, 1], got {rate}"),
                });
            }
        }
        if self.beta <= 0.0 {
            return Err(LearnError::Configuration {
                message: format!("beta must be positive, got {}", self.beta),
            });
        }
        if self.property_pairs.is_empty() {
            return Err(LearnError::Configuration {
                message: "property_pairs must name at least one source/target pair".into(),
            });
        }
        if self.measures.is_empty() {
            return Err(LearnError::Configuration {
                message: "measures must name at least one similarity measure".into(),
            });
        }
        for name in &self.measures {
            if !catalog.contains(name) {
                return Err(LearnError::Configuration {
                    message: format!("unknown measure \"{name}\" in measures"),
                });
            }
        }
        Ok(())
    }

    /// Load parameters from a TOML file; unset fields keep their defaults.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| StoreError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

/// Cooperative cancellation handle, checked at generation boundaries.
///
/// Cancelling is not an error: a cancelled run returns its best-so-far
/// result flagged [`MlResult::partial`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// The best specification of one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationBest {
    pub generation: usize,
    pub spec: LinkSpec,
    /// Raw fitness, cost framing: lower is better.
    pub raw_fitness: f64,
}

/// Result bundle of a learning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlResult {
    /// The best specification found.
    pub spec: LinkSpec,
    /// Quality of the best specification (1 − raw fitness; an F-measure scale).
    pub quality: f64,
    /// Per-generation history of bests.
    pub history: Vec<GenerationBest>,
    /// Oracle questions for the next round (supervised runs only).
    pub oracle_questions: Vec<OracleQuestion>,
    /// Whether the run was cut short by cancellation.
    pub partial: bool,
}

/// A learning algorithm over link specifications.
pub trait Learner {
    /// Algorithm name.
    fn name(&self) -> &'static str;

    /// Whether the learner implements a mode.
    fn supports(&self, mode: MlMode) -> bool;

    /// Supervised batch learning against labeled training links.
    fn learn(&mut self, training: &Mapping) -> Result<MlResult, LearnError>;

    /// Unsupervised learning against the pseudo-F-measure.
    fn learn_unsupervised(&mut self) -> Result<MlResult, LearnError>;

    /// Apply a learned specification to the learner's store pair.
    fn predict(&self, spec: &LinkSpec) -> Result<Mapping, LearnError>;

    /// Active-learning entry point: the next oracle examples.
    ///
    /// Batch-only learners report a capability mismatch.
    fn next_examples(&mut self, _size: usize) -> Result<Vec<OracleQuestion>, LearnError> {
        Err(LearnError::UnsupportedMode {
            algorithm: self.name().to_string(),
            mode: MlMode::ActiveLearning.to_string(),
        })
    }
}

/// Merge oracle answers into a training mapping for the next round.
///
/// Each answer pairs a question with a confidence label in [0, 1]. Confirmed
/// non-matches (label 0) are dropped by the mapping invariant; everything
/// positive extends the training data.
pub fn merge_oracle_answers(
    training: &mut Mapping,
    answers: impl IntoIterator<Item = (OracleQuestion, f64)>,
) {
    for (question, label) in answers {
        training.add(question.source, question.target, label);
    }
}
