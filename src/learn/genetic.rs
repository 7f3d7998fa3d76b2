//! Genetic-programming substrate: populations of link specifications.
//!
//! A [`Genotype`] owns its configuration and RNG by value, so every learning
//! run evolves in isolation — there is no process-wide engine state to reset
//! between runs. Specifications are bred over the configured property pairs
//! and measure names by tournament selection, subtree crossover, and
//! subtree/threshold mutation.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::spec::LinkSpec;

use super::fitness::FitnessFunction;

/// Raw fitness of a not-yet-evaluated individual.
pub const UNEVALUATED: f64 = f64::MAX;

/// One candidate specification with its raw fitness (lower is better).
#[derive(Debug, Clone)]
pub struct Individual {
    pub spec: LinkSpec,
    pub raw_fitness: f64,
}

impl Individual {
    fn fresh(spec: LinkSpec) -> Self {
        Self {
            spec,
            raw_fitness: UNEVALUATED,
        }
    }
}

/// The ordered individuals of one generation.
#[derive(Debug, Clone, Default)]
pub struct Population {
    individuals: Vec<Individual>,
}

impl Population {
    /// Sort ascending by raw fitness (fittest first).
    pub fn sort_by_fitness(&mut self) {
        self.individuals
            .sort_by(|a, b| a.raw_fitness.total_cmp(&b.raw_fitness));
    }

    /// The first individual in current order.
    pub fn first(&self) -> Option<&Individual> {
        self.individuals.first()
    }

    /// The fittest individual by linear scan, independent of sort order.
    pub fn determine_fittest(&self) -> Option<&Individual> {
        self.individuals
            .iter()
            .min_by(|a, b| a.raw_fitness.total_cmp(&b.raw_fitness))
    }

    /// All individuals.
    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    /// Number of individuals.
    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    /// Whether the population is empty.
    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }
}

/// Breeding configuration of one run.
#[derive(Debug, Clone)]
pub struct GenotypeConfig {
    pub population_size: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub reproduction_rate: f64,
    /// Source/target property pairs atoms may compare.
    pub property_pairs: Vec<(String, String)>,
    /// Measure names atoms may use.
    pub measures: Vec<String>,
    /// Depth cap for generated and bred trees.
    pub max_depth: usize,
}

/// Per-run evolutionary engine over link specifications.
pub struct Genotype {
    config: GenotypeConfig,
    rng: StdRng,
    population: Population,
    fittest_computed: Option<Individual>,
}

impl Genotype {
    /// Create a genotype with a randomly initialized population.
    ///
    /// `seed` makes the run reproducible; `None` seeds from entropy.
    pub fn new(config: GenotypeConfig, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let individuals = (0..config.population_size)
            .map(|_| {
                let depth = rng.gen_range(1..=config.max_depth);
                Individual::fresh(random_spec(&config, &mut rng, depth))
            })
            .collect();

        Self {
            config,
            rng,
            population: Population { individuals },
            fittest_computed: None,
        }
    }

    /// The current population.
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Mutable access for sorting by the caller.
    pub fn population_mut(&mut self) -> &mut Population {
        &mut self.population
    }

    /// The engine's own best individual computed so far, across generations.
    pub fn fittest_computed(&self) -> Option<&Individual> {
        self.fittest_computed.as_ref()
    }

    /// Breed the next generation from the current one.
    pub fn evolve(&mut self) {
        let size = self.config.population_size;
        let mut next = Vec::with_capacity(size);

        while next.len() < size {
            let roll: f64 = self.rng.r#gen();
            let spec = if roll < self.config.crossover_rate && self.population.len() >= 2 {
                let a = self.tournament().spec.clone();
                let b = self.tournament().spec.clone();
                self.crossover(&a, &b)
            } else if roll < self.config.crossover_rate + self.config.mutation_rate {
                let parent = self.tournament().spec.clone();
                self.mutate(&parent)
            } else {
                self.tournament().spec.clone()
            };
            next.push(Individual::fresh(spec));
        }

        self.population = Population { individuals: next };
    }

    /// Evaluate every individual, in parallel, and track the engine best.
    pub fn evaluate(&mut self, fitness: &dyn FitnessFunction) {
        let fits: Vec<f64> = self
            .population
            .individuals
            .par_iter()
            .map(|individual| fitness.raw_fitness(&individual.spec))
            .collect();
        for (individual, fit) in self.population.individuals.iter_mut().zip(fits) {
            individual.raw_fitness = fit;
        }

        if let Some(best) = self.population.determine_fittest() {
            let improves = self
                .fittest_computed
                .as_ref()
                .is_none_or(|incumbent| best.raw_fitness < incumbent.raw_fitness);
            if improves {
                self.fittest_computed = Some(best.clone());
            }
        }
    }

    /// Binary tournament on raw fitness.
    fn tournament(&mut self) -> &Individual {
        let len = self.population.len();
        let a = self.rng.gen_range(0..len);
        let b = self.rng.gen_range(0..len);
        let individuals = &self.population.individuals;
        if individuals[a].raw_fitness <= individuals[b].raw_fitness {
            &individuals[a]
        } else {
            &individuals[b]
        }
    }

    /// Swap a random subtree of `a` for a random subtree of `b`.
    fn crossover(&mut self, a: &LinkSpec, b: &LinkSpec) -> LinkSpec {
        let at = self.rng.gen_range(0..a.size());
        let from = self.rng.gen_range(0..b.size());
        let donor = b.subtree(from).expect("index within size").clone();
        let child = a.with_replaced(at, donor);
        self.enforce_depth(child)
    }

    /// Jitter a threshold or replace a subtree with a fresh atom.
    fn mutate(&mut self, parent: &LinkSpec) -> LinkSpec {
        let at = self.rng.gen_range(0..parent.size());
        let mutated = if self.rng.gen_bool(0.5) {
            let node = parent.subtree(at).expect("index within size");
            let rethresholded = node.with_threshold(self.random_threshold());
            parent.with_replaced(at, rethresholded)
        } else {
            let atom = self.random_atom();
            parent.with_replaced(at, atom)
        };
        self.enforce_depth(mutated)
    }

    fn enforce_depth(&mut self, spec: LinkSpec) -> LinkSpec {
        if spec.depth() > self.config.max_depth + 1 {
            self.random_atom()
        } else {
            spec
        }
    }

    fn random_threshold(&mut self) -> f64 {
        self.rng.gen_range(0.1..=1.0)
    }

    fn random_atom(&mut self) -> LinkSpec {
        let threshold = self.random_threshold();
        let (source_property, target_property) = self
            .config
            .property_pairs
            .choose(&mut self.rng)
            .expect("validated: at least one property pair")
            .clone();
        let measure = self
            .config
            .measures
            .choose(&mut self.rng)
            .expect("validated: at least one measure")
            .clone();
        LinkSpec::atom(measure, source_property, target_property, threshold)
    }
}

/// Random specification of at most `depth` levels.
fn random_spec(config: &GenotypeConfig, rng: &mut StdRng, depth: usize) -> LinkSpec {
    let atom = |rng: &mut StdRng| {
        let threshold = rng.gen_range(0.1..=1.0);
        let (source_property, target_property) = config
            .property_pairs
            .choose(rng)
            .expect("validated: at least one property pair")
            .clone();
        let measure = config
            .measures
            .choose(rng)
            .expect("validated: at least one measure")
            .clone();
        LinkSpec::atom(measure, source_property, target_property, threshold)
    };

    if depth <= 1 || rng.gen_bool(0.5) {
        return atom(rng);
    }

    let left = Box::new(random_spec(config, rng, depth - 1));
    let right = Box::new(random_spec(config, rng, depth - 1));
    let threshold = rng.gen_range(0.1..=1.0);
    match rng.gen_range(0..3) {
        0 => LinkSpec::And {
            left,
            right,
            threshold,
        },
        1 => LinkSpec::Or {
            left,
            right,
            threshold,
        },
        _ => LinkSpec::Minus {
            left,
            right,
            threshold,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::mapping::Mapping;

    fn config() -> GenotypeConfig {
        GenotypeConfig {
            population_size: 12,
            mutation_rate: 0.4,
            crossover_rate: 0.3,
            reproduction_rate: 0.3,
            property_pairs: vec![("name".into(), "name".into()), ("city".into(), "city".into())],
            measures: vec!["exact".into(), "jaccard".into()],
            max_depth: 3,
        }
    }

    /// Fitness that rewards deeper specifications, for deterministic tests.
    struct DepthFitness;

    impl FitnessFunction for DepthFitness {
        fn raw_fitness(&self, spec: &LinkSpec) -> f64 {
            1.0 / spec.size() as f64
        }

        fn mapping_for(&self, _spec: &LinkSpec) -> Arc<Mapping> {
            Arc::new(Mapping::new())
        }
    }

    #[test]
    fn initial_population_is_valid_and_full() {
        let genotype = Genotype::new(config(), Some(7));
        assert_eq!(genotype.population().len(), 12);
        for individual in genotype.population().individuals() {
            individual.spec.validate().expect("generated spec is valid");
            assert!(individual.spec.depth() <= 3);
            assert_eq!(individual.raw_fitness, UNEVALUATED);
        }
    }

    #[test]
    fn same_seed_same_population() {
        let a = Genotype::new(config(), Some(42));
        let b = Genotype::new(config(), Some(42));
        let specs_a: Vec<String> = a
            .population()
            .individuals()
            .iter()
            .map(|i| i.spec.to_string())
            .collect();
        let specs_b: Vec<String> = b
            .population()
            .individuals()
            .iter()
            .map(|i| i.spec.to_string())
            .collect();
        assert_eq!(specs_a, specs_b);
    }

    #[test]
    fn evolve_keeps_population_size_and_validity() {
        let mut genotype = Genotype::new(config(), Some(3));
        genotype.evaluate(&DepthFitness);
        for _ in 0..5 {
            genotype.evolve();
            genotype.evaluate(&DepthFitness);
            assert_eq!(genotype.population().len(), 12);
            for individual in genotype.population().individuals() {
                individual.spec.validate().expect("bred spec is valid");
            }
        }
    }

    #[test]
    fn fittest_computed_never_worsens() {
        let mut genotype = Genotype::new(config(), Some(11));
        genotype.evaluate(&DepthFitness);
        let mut best = genotype.fittest_computed().unwrap().raw_fitness;
        for _ in 0..10 {
            genotype.evolve();
            genotype.evaluate(&DepthFitness);
            let now = genotype.fittest_computed().unwrap().raw_fitness;
            assert!(now <= best);
            best = now;
        }
    }

    #[test]
    fn sort_by_fitness_is_ascending() {
        let mut genotype = Genotype::new(config(), Some(5));
        genotype.evaluate(&DepthFitness);
        genotype.population_mut().sort_by_fitness();
        let fits: Vec<f64> = genotype
            .population()
            .individuals()
            .iter()
            .map(|i| i.raw_fitness)
            .collect();
        let mut sorted = fits.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(fits, sorted);
        assert_eq!(
            genotype.population().first().unwrap().raw_fitness,
            genotype.population().determine_fittest().unwrap().raw_fitness
        );
    }
}
