//! State capture round-trips: a restored forest answers and evolves
//! exactly like the original.

use cutforest::datagen;
use cutforest::{RandomCutForest, TransformMethod};

fn assert_scores_match(a: &RandomCutForest, b: &RandomCutForest, queries: &[Vec<f32>]) {
    for query in queries {
        let x = a.anomaly_score(query).unwrap();
        let y = b.anomaly_score(query).unwrap();
        assert!((x - y).abs() < 1e-6, "{} vs {}", x, y);
    }
}

#[test]
fn round_trip_preserves_scores_and_replay() {
    let mut forest = RandomCutForest::builder(2, 1)
        .number_of_trees(20)
        .sample_size(128)
        .store_sequence_indexes(true)
        .random_seed(101)
        .build()
        .unwrap();
    let data = datagen::gaussian(600, &[0.0, 0.0], &[1.0, 1.0], 41);
    for (i, point) in data[..500].iter().enumerate() {
        forest.update(point, i as u64).unwrap();
    }

    let state = forest.to_state();
    let mut restored = RandomCutForest::from_state(state).unwrap();

    let queries: Vec<Vec<f32>> = data[500..520].to_vec();
    assert_scores_match(&forest, &restored, &queries);

    // both copies must evolve identically on the held-out suffix
    for (i, point) in data[500..].iter().enumerate() {
        forest.update(point, (500 + i) as u64).unwrap();
        restored.update(point, (500 + i) as u64).unwrap();
    }
    assert_scores_match(&forest, &restored, &queries);
    assert_eq!(forest.entries_seen(), restored.entries_seen());
    restored.core().validate().unwrap();
}

#[test]
fn round_trip_covers_the_preprocessing_pipeline() {
    let build = || {
        RandomCutForest::builder(6, 3)
            .number_of_trees(10)
            .sample_size(64)
            .output_after(20)
            .transform_method(TransformMethod::Normalize)
            .random_seed(7)
            .build()
            .unwrap()
    };
    let mut forest = build();
    let wave = datagen::noisy_sine(400, 12.0, 2.0, 0.1, 9);
    for (i, &value) in wave.iter().enumerate() {
        forest.update(&[value, -value], i as u64).unwrap();
    }

    let mut restored = RandomCutForest::from_state(forest.to_state()).unwrap();
    let queries: Vec<Vec<f32>> = (0..10).map(|i| vec![wave[i], -wave[i]]).collect();
    assert_scores_match(&forest, &restored, &queries);

    for (i, &value) in wave.iter().enumerate() {
        forest.update(&[value, -value], (400 + i) as u64).unwrap();
        restored.update(&[value, -value], (400 + i) as u64).unwrap();
    }
    assert_scores_match(&forest, &restored, &queries);
    assert!((forest.data_quality() - restored.data_quality()).abs() < 1e-12);

    let a = forest.extrapolate(3).unwrap();
    let b = restored.extrapolate(3).unwrap();
    for (x, y) in a.values.iter().zip(&b.values) {
        assert!((x - y).abs() < 1e-6);
    }
}
