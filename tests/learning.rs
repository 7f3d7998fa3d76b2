//! End-to-end learning tests: supervised and unsupervised runs, oracle
//! round-trips, and cancellation.

use std::sync::Arc;

use lodestone::block::KeyFunction;
use lodestone::exec::ExecutionEngine;
use lodestone::instance::Instance;
use lodestone::learn::{
    CancelToken, Eagle, LearnParams, Learner, MlMode, merge_oracle_answers,
};
use lodestone::mapping::Mapping;
use lodestone::measure::MeasureCatalog;
use lodestone::store::EntityStore;

fn people_engine() -> Arc<ExecutionEngine> {
    let people = [
        ("alice liddell", "Leipzig"),
        ("bob marley", "Berlin"),
        ("carol king", "Leipzig"),
        ("dan brown", "Dresden"),
    ];

    let mut source = EntityStore::new();
    let mut target = EntityStore::new();
    for (i, (name, city)) in people.iter().enumerate() {
        source
            .insert(
                Instance::new(format!("urn:s{i}"))
                    .with_value("name", *name)
                    .with_value("city", *city),
            )
            .unwrap();
        // Target side carries slightly perturbed names.
        let perturbed = name.replace('a', "e");
        target
            .insert(
                Instance::new(format!("urn:t{i}"))
                    .with_value("name", perturbed)
                    .with_value("city", *city),
            )
            .unwrap();
    }

    Arc::new(ExecutionEngine::new(
        Arc::new(source),
        Arc::new(target),
        Arc::new(MeasureCatalog::default()),
        KeyFunction::TokenPrefix {
            property: "city".into(),
            len: 3,
        },
    ))
}

fn params(generations: usize) -> LearnParams {
    LearnParams {
        generations,
        population_size: 16,
        seed: Some(99),
        property_pairs: vec![
            ("name".into(), "name".into()),
            ("city".into(), "city".into()),
        ],
        ..Default::default()
    }
}

fn training() -> Mapping {
    let mut training = Mapping::new();
    training.add("urn:s0", "urn:t0", 1.0);
    training.add("urn:s1", "urn:t1", 1.0);
    training.add("urn:s2", "urn:t2", 1.0);
    training.add("urn:s3", "urn:t3", 1.0);
    training
}

#[test]
fn supervised_run_learns_a_usable_spec() {
    let engine = people_engine();
    let mut eagle = Eagle::new(Arc::clone(&engine), params(12)).unwrap();
    let result = eagle.learn(&training()).unwrap();

    assert!(!result.partial);
    assert_eq!(result.history.len(), 12);
    assert!(result.quality > 0.0, "quality was {}", result.quality);
    result.spec.validate().unwrap();

    // The learned spec executes cleanly on the same store pair.
    let mapping = eagle.predict(&result.spec).unwrap();
    for (_, _, confidence) in mapping.iter() {
        assert!(confidence > 0.0);
    }
}

#[test]
fn supervised_history_never_undercuts_the_retained_best() {
    let engine = people_engine();
    let mut eagle = Eagle::new(engine, params(10)).unwrap();
    let result = eagle.learn(&training()).unwrap();

    let final_raw = 1.0 - result.quality;
    for entry in &result.history {
        assert!(
            entry.raw_fitness >= final_raw - 1e-12,
            "generation {} best ({}) undercuts the retained best ({final_raw})",
            entry.generation,
            entry.raw_fitness
        );
    }
}

#[test]
fn oracle_round_trip_extends_training() {
    let engine = people_engine();
    let mut eagle = Eagle::new(Arc::clone(&engine), params(6)).unwrap();

    let mut training = training();
    let result = eagle.learn(&training).unwrap();

    let before = training.size();
    let answers: Vec<_> = result
        .oracle_questions
        .iter()
        .cloned()
        .map(|question| (question, 1.0))
        .collect();
    let answered = answers.len();
    merge_oracle_answers(&mut training, answers);
    assert!(training.size() <= before + answered);

    // The extended training data feeds a second round.
    let mut second = Eagle::new(engine, params(3)).unwrap();
    let result = second.learn(&training).unwrap();
    assert_eq!(result.history.len(), 3);
}

#[test]
fn unsupervised_run_produces_history_without_oracle_batch() {
    let engine = people_engine();
    let mut eagle = Eagle::new(engine, params(5)).unwrap();
    let result = eagle.learn_unsupervised().unwrap();

    assert_eq!(result.history.len(), 5);
    assert!(result.oracle_questions.is_empty());
    result.spec.validate().unwrap();
}

#[test]
fn seeded_runs_are_reproducible() {
    let engine = people_engine();
    let training = training();

    let mut first = Eagle::new(Arc::clone(&engine), params(4)).unwrap();
    let mut second = Eagle::new(engine, params(4)).unwrap();
    let a = first.learn(&training).unwrap();
    let b = second.learn(&training).unwrap();

    assert_eq!(a.spec, b.spec);
    assert_eq!(a.quality, b.quality);
    let specs_a: Vec<String> = a.history.iter().map(|h| h.spec.to_string()).collect();
    let specs_b: Vec<String> = b.history.iter().map(|h| h.spec.to_string()).collect();
    assert_eq!(specs_a, specs_b);
}

#[test]
fn cancellation_yields_partial_result_not_error() {
    let engine = people_engine();
    let mut eagle = Eagle::new(engine, params(1000)).unwrap();
    let token: CancelToken = eagle.cancel_token();
    token.cancel();

    let result = eagle.learn(&training()).unwrap();
    assert!(result.partial);
    result.spec.validate().unwrap();
}

#[test]
fn learner_reports_supported_modes() {
    let engine = people_engine();
    let eagle = Eagle::new(engine, params(1)).unwrap();
    assert!(eagle.supports(MlMode::SupervisedBatch));
    assert!(eagle.supports(MlMode::Unsupervised));
    assert!(!eagle.supports(MlMode::ActiveLearning));
}
