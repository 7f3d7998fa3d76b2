//! Eagle: genetic-programming learner for link specifications.
//!
//! Eagle evolves a population of specifications over a fixed number of
//! generations, scored by a supervised F-measure against training links or by
//! the unsupervised pseudo-F-measure. Supervised runs additionally propose
//! oracle questions for the most contested candidate pairs.
//!
//! The all-time best individual is carried across generations by an explicit
//! reducer at each generation boundary: a candidate replaces the incumbent
//! only when strictly fitter, so with "preserve fittest" enabled the retained
//! best's cost never increases over a run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::error::LearnError;
use crate::exec::ExecutionEngine;
use crate::mapping::Mapping;
use crate::spec::LinkSpec;

use super::fitness::{FitnessFunction, PseudoFitness, SupervisedFitness};
use super::genetic::{Genotype, GenotypeConfig, Individual};
use super::selector::{OracleQuestion, select_controversial};
use super::{CancelToken, GenerationBest, LearnParams, Learner, MlMode, MlResult, TerminationKind};

/// Depth cap for bred specification trees.
const MAX_TREE_DEPTH: usize = 3;

/// The Eagle evolutionary learner.
pub struct Eagle {
    engine: Arc<ExecutionEngine>,
    params: LearnParams,
    cancel: CancelToken,
}

impl Eagle {
    /// Create a learner. Fails with a configuration error before any
    /// generation runs if the parameter combination is invalid.
    pub fn new(engine: Arc<ExecutionEngine>, params: LearnParams) -> Result<Self, LearnError> {
        params.validate(engine.catalog())?;
        Ok(Self {
            engine,
            params,
            cancel: CancelToken::new(),
        })
    }

    /// Handle for cancelling this learner's runs at generation boundaries.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn build_genotype(&self) -> Genotype {
        Genotype::new(
            GenotypeConfig {
                population_size: self.params.population_size,
                mutation_rate: self.params.mutation_rate,
                crossover_rate: self.params.crossover_rate,
                reproduction_rate: self.params.reproduction_rate,
                property_pairs: self.params.property_pairs.clone(),
                measures: self.params.measures.clone(),
                max_depth: MAX_TREE_DEPTH,
            },
            self.params.seed,
        )
    }

    /// The generation loop shared by both modes.
    ///
    /// Returns the all-time best, the per-generation history, and whether the
    /// run was cut short by cancellation. Checks the cancel token only at
    /// generation boundaries, so a generation never partially completes.
    fn run_generations(
        &self,
        genotype: &mut Genotype,
        fitness: &dyn FitnessFunction,
    ) -> (Option<Individual>, Vec<GenerationBest>, bool) {
        let started = Instant::now();
        let mut all_best: Option<Individual> = None;
        let mut history = Vec::new();
        let mut partial = false;

        for generation in 1..=self.params.generations {
            if self.cancel.is_cancelled() {
                tracing::info!(generation, "run cancelled, returning best so far");
                partial = true;
                break;
            }

            genotype.evolve();
            genotype.evaluate(fitness);

            if let Some(best_here) = determine_fittest(genotype, fitness) {
                history.push(GenerationBest {
                    generation,
                    spec: best_here.spec.clone(),
                    raw_fitness: best_here.raw_fitness,
                });
                all_best = reduce_best(
                    all_best,
                    best_here,
                    self.params.preserve_fittest,
                    generation,
                );
            }

            match self.params.termination {
                TerminationKind::Generations => {}
                TerminationKind::Duration => {
                    if started.elapsed().as_secs_f64() >= self.params.termination_value {
                        tracing::info!(generation, "duration criterion satisfied");
                        break;
                    }
                }
                TerminationKind::Quality => {
                    let reached = all_best
                        .as_ref()
                        .is_some_and(|best| 1.0 - best.raw_fitness >= self.params.termination_value);
                    if reached {
                        tracing::info!(generation, "quality criterion satisfied");
                        break;
                    }
                }
            }
            if started.elapsed().as_secs() >= self.params.max_duration_secs {
                tracing::info!(generation, "wall-clock cap reached");
                break;
            }
        }

        (all_best, history, partial)
    }

    /// Best individual, falling back to a one-off evaluation of the current
    /// population when the loop produced none (cancelled before generation 1).
    fn settle_best(
        &self,
        all_best: Option<Individual>,
        genotype: &mut Genotype,
        fitness: &dyn FitnessFunction,
    ) -> Result<Individual, LearnError> {
        if let Some(best) = all_best {
            return Ok(best);
        }
        genotype.evaluate(fitness);
        determine_fittest(genotype, fitness).ok_or_else(|| LearnError::Configuration {
            message: "population produced no evaluable individual".into(),
        })
    }

    /// Oracle questions from the final population's distinct specifications
    /// plus the all-time best.
    ///
    /// When fewer than two distinct specifications are available the selector
    /// cannot score controversy; the round's oracle batch is skipped with a
    /// warning and the learning result stays complete.
    fn oracle_questions(
        &self,
        genotype: &Genotype,
        fitness: &dyn FitnessFunction,
        all_best: &Individual,
    ) -> Vec<OracleQuestion> {
        let mut distinct: HashSet<LinkSpec> = HashSet::new();
        distinct.insert(all_best.spec.clone());
        for individual in genotype.population().individuals() {
            distinct.insert(individual.spec.clone());
        }

        let mut specs: Vec<LinkSpec> = distinct.into_iter().collect();
        specs.sort_by_key(|spec| spec.to_string());

        tracing::info!(
            specifications = specs.len(),
            "computing candidate mappings for controversy scoring"
        );
        let candidate_mappings: Vec<Mapping> = specs
            .iter()
            .map(|spec| (*fitness.mapping_for(spec)).clone())
            .collect();

        match select_controversial(&candidate_mappings, self.params.inquiry_size) {
            Ok(questions) => questions,
            Err(error) => {
                tracing::warn!(%error, "skipping oracle round");
                Vec::new()
            }
        }
    }
}

impl Learner for Eagle {
    fn name(&self) -> &'static str {
        "eagle"
    }

    fn supports(&self, mode: MlMode) -> bool {
        matches!(mode, MlMode::SupervisedBatch | MlMode::Unsupervised)
    }

    fn learn(&mut self, training: &Mapping) -> Result<MlResult, LearnError> {
        tracing::info!(
            training_links = training.size(),
            generations = self.params.generations,
            population = self.params.population_size,
            "starting supervised run"
        );
        let fitness = SupervisedFitness::new(
            Arc::clone(&self.engine),
            &training.positives(),
            self.params.beta,
        );
        let mut genotype = self.build_genotype();

        let (all_best, history, partial) = self.run_generations(&mut genotype, &fitness);
        let best = self.settle_best(all_best, &mut genotype, &fitness)?;
        let oracle_questions = self.oracle_questions(&genotype, &fitness, &best);

        Ok(MlResult {
            quality: 1.0 - best.raw_fitness,
            spec: best.spec,
            history,
            oracle_questions,
            partial,
        })
    }

    fn learn_unsupervised(&mut self) -> Result<MlResult, LearnError> {
        tracing::info!(
            generations = self.params.generations,
            population = self.params.population_size,
            "starting unsupervised run"
        );
        let fitness = PseudoFitness::new(Arc::clone(&self.engine), self.params.beta);
        let mut genotype = self.build_genotype();

        let (all_best, history, partial) = self.run_generations(&mut genotype, &fitness);
        let best = self.settle_best(all_best, &mut genotype, &fitness)?;

        Ok(MlResult {
            quality: 1.0 - best.raw_fitness,
            spec: best.spec,
            history,
            oracle_questions: Vec::new(),
            partial,
        })
    }

    fn predict(&self, spec: &LinkSpec) -> Result<Mapping, LearnError> {
        Ok(self.engine.execute(spec)?)
    }
}

/// The three-candidate fittest rule.
///
/// Considers the engine's best-computed individual, the population's best by
/// linear scan, and the first sorted individual; recomputes each raw fitness
/// and takes the lowest. Scans the whole population when all three are
/// absent.
fn determine_fittest(genotype: &mut Genotype, fitness: &dyn FitnessFunction) -> Option<Individual> {
    genotype.population_mut().sort_by_fitness();

    let candidates = [
        genotype.fittest_computed().cloned(),
        genotype.population().determine_fittest().cloned(),
        genotype.population().first().cloned(),
    ];

    let mut best: Option<Individual> = None;
    let mut fittest = f64::MAX;
    for candidate in candidates.into_iter().flatten() {
        let raw = fitness.raw_fitness(&candidate.spec);
        if raw < fittest {
            fittest = raw;
            best = Some(Individual {
                spec: candidate.spec,
                raw_fitness: raw,
            });
        }
    }

    if best.is_none() {
        tracing::debug!("determining best program failed, considering the whole population");
        for individual in genotype.population().individuals() {
            let raw = fitness.raw_fitness(&individual.spec);
            if raw < fittest {
                fittest = raw;
                best = Some(Individual {
                    spec: individual.spec.clone(),
                    raw_fitness: raw,
                });
            }
        }
    }

    best
}

/// Preserve-fittest reducer for the carried-forward best.
///
/// With preservation on, the candidate replaces the incumbent only when
/// strictly fitter; ties keep the incumbent. With preservation off the
/// latest generation's best is carried as-is.
fn reduce_best(
    current: Option<Individual>,
    candidate: Individual,
    preserve: bool,
    generation: usize,
) -> Option<Individual> {
    if !preserve {
        return Some(candidate);
    }
    match current {
        Some(incumbent) if candidate.raw_fitness < incumbent.raw_fitness => {
            tracing::info!(
                generation,
                fitness = candidate.raw_fitness,
                spec = %candidate.spec,
                "new fittest individual"
            );
            Some(candidate)
        }
        Some(incumbent) => Some(incumbent),
        None => {
            tracing::info!(
                generation,
                fitness = candidate.raw_fitness,
                spec = %candidate.spec,
                "new fittest individual"
            );
            Some(candidate)
        }
    }
}
