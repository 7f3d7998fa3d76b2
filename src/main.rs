//! lodestone CLI: link discovery engine.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Deserialize;

use lodestone::block::KeyFunction;
use lodestone::exec::ExecutionEngine;
use lodestone::learn::{Eagle, LearnParams, Learner, MlResult};
use lodestone::mapping::Mapping;
use lodestone::measure::MeasureCatalog;
use lodestone::spec::LinkSpec;
use lodestone::store::EntityStore;

#[derive(Parser)]
#[command(name = "lodestone", version, about = "Link discovery engine")]
struct Cli {
    /// Property to block on. Defaults to the first property the spec or the
    /// learning parameters compare.
    #[arg(long, global = true)]
    block_property: Option<String>,

    /// Token prefix length of the blocking key.
    #[arg(long, global = true, default_value = "3")]
    prefix_len: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a link specification over two stores.
    Match {
        /// Source dataset (JSON).
        #[arg(long)]
        source: PathBuf,

        /// Target dataset (JSON).
        #[arg(long)]
        target: PathBuf,

        /// Specification, e.g. "AND(jaccard(name, name)|0.8, trigram(city, city)|0.7)|0.8".
        #[arg(long)]
        spec: String,

        /// Write the mapping as JSON to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Learn a specification from labeled training links.
    Learn {
        /// Source dataset (JSON).
        #[arg(long)]
        source: PathBuf,

        /// Target dataset (JSON).
        #[arg(long)]
        target: PathBuf,

        /// Training links: JSON array of {"source", "target", "confidence"}.
        #[arg(long)]
        training: PathBuf,

        /// Learning parameters (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// RNG seed for a reproducible run.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Learn a specification without ground truth (pseudo-F-measure).
    LearnUnsupervised {
        /// Source dataset (JSON).
        #[arg(long)]
        source: PathBuf,

        /// Target dataset (JSON).
        #[arg(long)]
        target: PathBuf,

        /// Learning parameters (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// RNG seed for a reproducible run.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Show instance count and property coverage of a store.
    Info {
        /// Dataset (JSON).
        #[arg(long)]
        store: PathBuf,

        /// Minimum coverage to report.
        #[arg(long, default_value = "0.0")]
        min_coverage: f64,
    },
}

/// One labeled training link, as read from the training file.
#[derive(Debug, Deserialize)]
struct TrainingLink {
    source: String,
    target: String,
    #[serde(default = "confidence_one")]
    confidence: f64,
}

fn confidence_one() -> f64 {
    1.0
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Match {
            source,
            target,
            spec,
            output,
        } => {
            let spec: LinkSpec = spec.parse().into_diagnostic()?;
            let block_property = cli
                .block_property
                .clone()
                .or_else(|| first_compared_property(&spec))
                .ok_or_else(|| miette::miette!("could not derive a blocking property"))?;

            let engine = build_engine(&source, &target, &block_property, cli.prefix_len)?;
            let mapping = engine.execute(&spec).into_diagnostic()?;

            match output {
                Some(path) => {
                    let json = serde_json::to_string_pretty(&mapping).into_diagnostic()?;
                    std::fs::write(&path, json).into_diagnostic()?;
                    println!("Wrote {} links to {}", mapping.size(), path.display());
                }
                None => print!("{mapping}"),
            }
        }

        Commands::Learn {
            source,
            target,
            training,
            config,
            seed,
        } => {
            let training = load_training(&training)?;
            let mut params = load_params(config)?;
            if seed.is_some() {
                params.seed = seed;
            }

            let (params, engine) = prepare_learning(
                params,
                &source,
                &target,
                cli.block_property.clone(),
                cli.prefix_len,
            )?;
            let mut eagle = Eagle::new(engine, params).into_diagnostic()?;
            let result = eagle.learn(&training).into_diagnostic()?;
            print_result(&result);

            if !result.oracle_questions.is_empty() {
                println!("\nOracle questions (most controversial first):");
                for (i, question) in result.oracle_questions.iter().enumerate() {
                    println!(
                        "  {}. {} -> {} (mean confidence: {:.4})",
                        i + 1,
                        question.source,
                        question.target,
                        question.similarity
                    );
                }
            }
        }

        Commands::LearnUnsupervised {
            source,
            target,
            config,
            seed,
        } => {
            let mut params = load_params(config)?;
            if seed.is_some() {
                params.seed = seed;
            }

            let (params, engine) = prepare_learning(
                params,
                &source,
                &target,
                cli.block_property.clone(),
                cli.prefix_len,
            )?;
            let mut eagle = Eagle::new(engine, params).into_diagnostic()?;
            let result = eagle.learn_unsupervised().into_diagnostic()?;
            print_result(&result);
        }

        Commands::Info {
            store,
            min_coverage,
        } => {
            let store = EntityStore::load_json(&store).into_diagnostic()?;
            println!("instances: {}", store.len());
            println!("property coverage (>= {min_coverage}):");
            for (property, coverage) in store.property_coverage(min_coverage) {
                println!("  {property}: {:.1}%", coverage * 100.0);
            }
        }
    }

    Ok(())
}

fn build_engine(
    source: &PathBuf,
    target: &PathBuf,
    block_property: &str,
    prefix_len: usize,
) -> Result<Arc<ExecutionEngine>> {
    let source = Arc::new(EntityStore::load_json(source).into_diagnostic()?);
    let target = Arc::new(EntityStore::load_json(target).into_diagnostic()?);
    Ok(Arc::new(ExecutionEngine::new(
        source,
        target,
        Arc::new(MeasureCatalog::default()),
        KeyFunction::TokenPrefix {
            property: block_property.to_string(),
            len: prefix_len,
        },
    )))
}

/// Fill in derivable learning inputs and build the execution engine.
///
/// When the parameters name no property pairs, pairs are derived from the
/// properties both stores cover well.
fn prepare_learning(
    mut params: LearnParams,
    source: &PathBuf,
    target: &PathBuf,
    block_property: Option<String>,
    prefix_len: usize,
) -> Result<(LearnParams, Arc<ExecutionEngine>)> {
    let source_store = Arc::new(EntityStore::load_json(source).into_diagnostic()?);
    let target_store = Arc::new(EntityStore::load_json(target).into_diagnostic()?);

    if params.property_pairs.is_empty() {
        params.property_pairs = derive_property_pairs(&source_store, &target_store);
        tracing::info!(
            pairs = ?params.property_pairs,
            "derived property pairs from coverage"
        );
    }

    let block_property = block_property
        .or_else(|| params.property_pairs.first().map(|(p, _)| p.clone()))
        .ok_or_else(|| miette::miette!("could not derive a blocking property"))?;

    let engine = Arc::new(ExecutionEngine::new(
        source_store,
        target_store,
        Arc::new(MeasureCatalog::default()),
        KeyFunction::TokenPrefix {
            property: block_property,
            len: prefix_len,
        },
    ));
    Ok((params, engine))
}

/// Properties covered by at least half of both stores, paired by name.
fn derive_property_pairs(source: &EntityStore, target: &EntityStore) -> Vec<(String, String)> {
    let target_coverage = target.property_coverage(0.5);
    source
        .property_coverage(0.5)
        .into_keys()
        .filter(|property| target_coverage.contains_key(property))
        .map(|property| (property.clone(), property))
        .collect()
}

fn load_training(path: &PathBuf) -> Result<Mapping> {
    let content = std::fs::read_to_string(path).into_diagnostic()?;
    let links: Vec<TrainingLink> = serde_json::from_str(&content).into_diagnostic()?;
    let mut training = Mapping::new();
    for link in links {
        training.add(link.source, link.target, link.confidence);
    }
    Ok(training)
}

fn load_params(config: Option<PathBuf>) -> Result<LearnParams> {
    match config {
        Some(path) => LearnParams::load_toml(&path).into_diagnostic(),
        None => Ok(LearnParams::default()),
    }
}

fn print_result(result: &MlResult) {
    println!("best specification: {}", result.spec);
    println!("quality:            {:.4}", result.quality);
    if result.partial {
        println!("(partial result: the run was cancelled)");
    }
    println!("\ngeneration history:");
    for entry in &result.history {
        println!(
            "  gen {:>3}: fitness {:.4}  {}",
            entry.generation, entry.raw_fitness, entry.spec
        );
    }
}

fn first_compared_property(spec: &LinkSpec) -> Option<String> {
    spec.atoms().first().and_then(|atom| match atom {
        LinkSpec::Atom {
            source_property, ..
        } => Some(source_property.clone()),
        _ => None,
    })
}
