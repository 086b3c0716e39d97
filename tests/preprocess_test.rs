//! Preprocessing pipeline behaviors: gap fill-in, the imputed-fraction
//! guard, data quality, normalization warmup and explicit missing
//! values.

use cutforest::{datagen, ForestMode, ImputationMethod, RandomCutForest, TransformMethod};

fn streaming_forest(fast_forward: bool) -> RandomCutForest {
    RandomCutForest::builder(4, 4)
        .number_of_trees(10)
        .sample_size(64)
        .output_after(10)
        .forest_mode(ForestMode::StreamingImpute)
        .imputation_method(ImputationMethod::Linear)
        .fast_forward(fast_forward)
        .random_seed(3)
        .build()
        .unwrap()
}

#[test]
fn timestamp_gaps_are_filled_with_imputed_tuples() {
    let mut forest = streaming_forest(true);
    for i in 0..200u64 {
        forest.update(&[(i % 9) as f32], i * 10).unwrap();
    }
    // shingle warmup swallowed the first three tuples
    assert_eq!(forest.entries_seen(), 197);
    assert_eq!(forest.preprocessor().unwrap().number_of_imputed(), 0);
    assert!((forest.data_quality() - 1.0).abs() < 1e-9);

    // a gap of 4.5 average steps synthesizes three tuples; the third
    // tuple and the closing observation push the imputed fraction of the
    // shingle past one half and stay shingle-only
    forest.update(&[4.0], 1990 + 45).unwrap();
    assert_eq!(forest.preprocessor().unwrap().number_of_imputed(), 3);
    assert_eq!(forest.entries_seen(), 199);
    assert!(forest.data_quality() < 1.0);

    // the flags ring forgets one imputed tuple per admitted observation
    forest.update(&[5.0], 2045).unwrap();
    forest.update(&[5.0], 2055).unwrap();
    assert_eq!(forest.preprocessor().unwrap().number_of_imputed(), 1);
    assert_eq!(forest.entries_seen(), 201);
}

#[test]
fn long_gaps_fast_forward_to_the_typical_value() {
    let mut forest = streaming_forest(true);
    for i in 0..200u64 {
        forest.update(&[5.0], i * 10).unwrap();
    }
    let before = forest.entries_seen();
    // far beyond 3 shingles of missing steps
    forest.update(&[5.0], 1990 + 100_000).unwrap();
    let preprocessor = forest.preprocessor().unwrap();
    // shingle_size - 1 typical tuples were admitted in place of the gap
    assert_eq!(preprocessor.number_of_imputed(), 3);
    // two of the four admissions cleared the imputed-fraction guard
    assert_eq!(forest.entries_seen(), before + 2);
}

#[test]
fn capped_interpolation_without_fast_forward() {
    let mut forest = streaming_forest(false);
    for i in 0..200u64 {
        forest.update(&[1.0], i * 10).unwrap();
    }
    forest.update(&[1.0], 1990 + 100_000).unwrap();
    // the fill-in is capped at three shingles of tuples, after which the
    // ring of flags holds the closing observation plus three imputed ones
    assert_eq!(forest.preprocessor().unwrap().number_of_imputed(), 3);
}

#[test]
fn explicit_missing_values_are_filled_and_tracked() {
    let mut forest = RandomCutForest::builder(2, 1)
        .number_of_trees(10)
        .sample_size(64)
        .output_after(10)
        .imputation_method(ImputationMethod::Fixed)
        .default_fill(&[9.0, 9.0])
        .random_seed(17)
        .build()
        .unwrap();
    for i in 0..50u64 {
        forest.update(&[1.0, 2.0], i).unwrap();
    }
    for k in 0..5u64 {
        forest
            .update_with_missing(&[f32::NAN, 2.0], 50 + k, &[0])
            .unwrap();
    }
    // the fill value is observable through the near-sample
    let neighbors = forest.near_neighbors(&[9.0, 2.0], 1e-3).unwrap();
    assert!(!neighbors.is_empty());
    assert!(forest.data_quality() < 1.0);
}

#[test]
fn normalization_buffers_then_drains() {
    let mut forest = RandomCutForest::builder(1, 1)
        .number_of_trees(10)
        .sample_size(64)
        .output_after(5)
        .transform_method(TransformMethod::Normalize)
        .start_normalization(10)
        .random_seed(23)
        .build()
        .unwrap();
    for i in 0..9u64 {
        forest.update(&[i as f32], i).unwrap();
        assert_eq!(forest.entries_seen(), 0);
    }
    forest.update(&[9.0], 9).unwrap();
    // the buffered warmup observations drained into the forest at once
    assert_eq!(forest.entries_seen(), 10);
}

#[test]
fn normalized_scoring_still_separates_outliers() {
    let mut forest = RandomCutForest::builder(2, 1)
        .number_of_trees(30)
        .sample_size(128)
        .transform_method(TransformMethod::Normalize)
        .random_seed(29)
        .build()
        .unwrap();
    let data = datagen::gaussian(800, &[100.0, -50.0], &[2.0, 2.0], 31);
    for (i, point) in data.iter().enumerate() {
        forest.update(point, i as u64).unwrap();
    }
    let ordinary = forest.anomaly_score(&[100.0, -50.0]).unwrap();
    let outlier = forest.anomaly_score(&[130.0, -50.0]).unwrap();
    assert!(outlier > ordinary);
    assert!(outlier > 1.5);
}

#[test]
fn time_augmentation_widens_the_tree_space() {
    let mut forest = RandomCutForest::builder(2, 2)
        .number_of_trees(10)
        .sample_size(64)
        .output_after(10)
        .forest_mode(ForestMode::TimeAugmented)
        .random_seed(37)
        .build()
        .unwrap();
    assert_eq!(forest.dimensions(), 4);
    for i in 0..100u64 {
        forest.update(&[(i % 5) as f32], i * 7).unwrap();
    }
    assert!(forest.is_ready());
    let score = forest.anomaly_score(&[2.0]).unwrap();
    assert!(score > 0.0);
}
