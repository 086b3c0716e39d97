//! Scoring scenarios over seeded synthetic streams. Run with
//! `cargo test --release`; the streams are sized for the optimized
//! profile.

use cutforest::datagen;
use cutforest::RandomCutForest;

fn trained_forest() -> RandomCutForest {
    let mut forest = RandomCutForest::builder(3, 1)
        .number_of_trees(50)
        .sample_size(256)
        .random_seed(42)
        .build()
        .unwrap();
    let data = datagen::gaussian(1000, &[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0], 42);
    for (i, point) in data.iter().enumerate() {
        forest.update(point, i as u64).unwrap();
    }
    forest
}

#[test]
fn spike_scores_far_above_the_training_stream() {
    let forest = trained_forest();
    let data = datagen::gaussian(1000, &[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0], 42);
    let mut training_scores: Vec<f64> = data
        .iter()
        .map(|p| forest.anomaly_score(p).unwrap())
        .collect();
    training_scores.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p99 = training_scores[(training_scores.len() * 99) / 100 - 1];

    let outlier_score = forest.anomaly_score(&[-5.0, 0.0, 0.0]).unwrap();
    assert!(
        outlier_score > 1.5 * p99,
        "outlier {} vs p99 {}",
        outlier_score,
        p99
    );
    assert!(outlier_score > 2.0, "outlier score {}", outlier_score);
}

#[test]
fn attribution_flags_the_dipping_dimension_and_sums_to_the_score() {
    let forest = trained_forest();
    let outlier = [-5.0f32, 0.0, 0.0];
    let score = forest.anomaly_score(&outlier).unwrap();
    let attribution = forest.anomaly_attribution(&outlier).unwrap();

    assert!((attribution.total() - score).abs() < 1e-6);
    // the spike is a dip in dimension 0
    assert!(attribution.low[0] > attribution.high[0]);
    assert!(attribution.low[0] > attribution.low[1] + attribution.high[1]);
    assert!(attribution.low[0] > attribution.low[2] + attribution.high[2]);
    assert!(attribution.low[0] > 0.5 * score);
}

#[test]
fn duplicates_damp_the_score() {
    let mut forest = trained_forest();
    let outlier = [-5.0f32, 0.0, 0.0];
    let first = forest.anomaly_score(&outlier).unwrap();
    for i in 0..5u64 {
        forest.update(&outlier, 1000 + i).unwrap();
    }
    let damped = forest.anomaly_score(&outlier).unwrap();
    assert!(
        damped < first,
        "score should drop after duplicates: {} -> {}",
        first,
        damped
    );
}

#[test]
fn approximate_score_converges_early_and_agrees() {
    let forest = trained_forest();
    let outlier = [-3.0f32, 0.0, 0.0];
    let full = forest.anomaly_score(&outlier).unwrap();

    // drive the converging traversal directly to observe the tree count
    let (approximate, used) = forest.core().approximate_score(&outlier, 0.1, 20).unwrap();
    assert!(used <= 20, "consulted {} trees", used);
    assert!(
        (approximate - full).abs() <= 0.2,
        "approximate {} vs full {}",
        approximate,
        full
    );
    // the facade variant agrees on the outlier verdict
    let spike = [-5.0f32, 0.0, 0.0];
    let facade = forest.approximate_anomaly_score(&spike).unwrap();
    assert!(facade > 1.5);
}

#[test]
fn not_ready_forest_returns_deterministic_defaults() {
    let mut forest = RandomCutForest::builder(2, 1)
        .number_of_trees(10)
        .sample_size(64)
        .output_after(32)
        .random_seed(1)
        .build()
        .unwrap();
    forest.update(&[1.0, 2.0], 0).unwrap();

    assert_eq!(forest.anomaly_score(&[1.0, 2.0]).unwrap(), 0.0);
    assert_eq!(forest.anomaly_attribution(&[1.0, 2.0]).unwrap().total(), 0.0);
    assert!(forest.near_neighbors(&[1.0, 2.0], 1.0).unwrap().is_empty());
    assert_eq!(
        forest.impute_missing_values(&[1.0, 2.0], 1, &[0]).unwrap(),
        vec![0.0, 2.0]
    );
    assert_eq!(forest.simple_density(&[1.0, 2.0]).unwrap().density, 0.0);
}

#[test]
fn invalid_inputs_are_rejected_at_the_boundary() {
    let mut forest = RandomCutForest::builder(2, 1)
        .number_of_trees(5)
        .sample_size(32)
        .build()
        .unwrap();
    assert!(forest.update(&[f32::NAN, 0.0], 0).is_err());
    assert!(forest.update(&[f32::INFINITY, 0.0], 0).is_err());
    assert!(forest.update(&[1.0], 0).is_err());
    assert!(forest.anomaly_score(&[f32::NAN, 0.0]).is_err());
}

#[test]
fn reference_counts_match_tree_masses() {
    let forest = trained_forest();
    let core = forest.core();
    core.validate().unwrap();
    assert_eq!(core.store().active_references(), core.total_tree_mass());
    let sampler_total: usize = core.trees().iter().map(|t| t.sampler().size()).sum();
    assert_eq!(sampler_total, core.total_tree_mass());
    assert!(sampler_total <= 50 * 256);
}

#[test]
fn parallel_and_sequential_execution_agree() {
    let build = |parallel: bool| {
        let mut forest = RandomCutForest::builder(2, 1)
            .number_of_trees(16)
            .sample_size(64)
            .random_seed(9)
            .parallel_execution(parallel)
            .thread_pool_size(if parallel { 4 } else { 0 })
            .build()
            .unwrap();
        let data = datagen::gaussian(400, &[0.0, 0.0], &[1.0, 1.0], 5);
        for (i, point) in data.iter().enumerate() {
            forest.update(point, i as u64).unwrap();
        }
        forest
    };
    let sequential = build(false);
    let parallel = build(true);
    for query in [[0.0f32, 0.0], [4.0, -4.0], [1.0, 1.0]] {
        let a = sequential.anomaly_score(&query).unwrap();
        let b = parallel.anomaly_score(&query).unwrap();
        assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
    }
}

#[test]
fn density_is_higher_in_the_bulk_than_in_the_tail() {
    let forest = trained_forest();
    let bulk = forest.simple_density(&[0.0, 0.0, 0.0]).unwrap();
    let tail = forest.simple_density(&[6.0, 6.0, 6.0]).unwrap();
    assert!(bulk.density > tail.density);
    assert!(bulk.density > 0.0);
}
