// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # lodestone
//!
//! A link discovery engine: finds correspondences between entities of two
//! datasets by executing and evolutionarily learning link specifications.
//!
//! ## Architecture
//!
//! - **Entity data** (`instance`, `store`): URI-keyed instances with
//!   multi-valued properties, read-only during matching
//! - **Similarity** (`measure`): pluggable catalog of [0, 1] measures
//! - **Blocking** (`block`): block-key partitioning that bounds the
//!   comparison space below quadratic
//! - **Specifications** (`spec`): boolean/threshold expression trees over
//!   measure atoms
//! - **Execution** (`exec`): blocked, data-parallel evaluation of a
//!   specification into a scored `mapping`
//! - **Learning** (`learn`): genetic-programming search (Eagle) with
//!   supervised/unsupervised fitness and active-learning oracle questions
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lodestone::block::KeyFunction;
//! use lodestone::exec::ExecutionEngine;
//! use lodestone::measure::MeasureCatalog;
//! use lodestone::spec::LinkSpec;
//! use lodestone::store::EntityStore;
//!
//! let source = Arc::new(EntityStore::load_json("source.json").unwrap());
//! let target = Arc::new(EntityStore::load_json("target.json").unwrap());
//! let engine = ExecutionEngine::new(
//!     source,
//!     target,
//!     Arc::new(MeasureCatalog::default()),
//!     KeyFunction::TokenPrefix { property: "name".into(), len: 3 },
//! );
//! let spec: LinkSpec = "jaccard(name, name)|0.8".parse().unwrap();
//! let mapping = engine.execute(&spec).unwrap();
//! ```

pub mod block;
pub mod error;
pub mod exec;
pub mod instance;
pub mod learn;
pub mod mapping;
pub mod measure;
pub mod spec;
pub mod store;
