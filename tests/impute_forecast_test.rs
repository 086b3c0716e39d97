//! Conditional queries: imputation, forecasting and near neighbors.

use cutforest::datagen;
use cutforest::RandomCutForest;

#[test]
fn imputation_recovers_the_conditioning_line() {
    let mut forest = RandomCutForest::builder(2, 1)
        .number_of_trees(50)
        .sample_size(256)
        .random_seed(7)
        .build()
        .unwrap();
    let data = datagen::noisy_line(2000, 2.0, 0.1, (-6.0, 6.0), 11);
    for (i, point) in data.iter().enumerate() {
        forest.update(point, i as u64).unwrap();
    }
    // y = 2x, so conditioning on y = 6 should recover x close to 3
    let completed = forest.impute_missing_values(&[0.0, 6.0], 1, &[0]).unwrap();
    assert!(
        (completed[0] - 3.0).abs() < 0.3,
        "imputed x = {}",
        completed[0]
    );
    assert_eq!(completed[1], 6.0);
}

#[test]
fn shingle_forecast_tracks_a_sine() {
    let mut forest = RandomCutForest::builder(4, 4)
        .number_of_trees(50)
        .sample_size(256)
        .random_seed(13)
        .build()
        .unwrap();
    let wave = datagen::noisy_sine(4000, 10.0, 1.0, 0.0, 0);
    for (i, &value) in wave.iter().enumerate() {
        forest.update(&[value], i as u64).unwrap();
    }
    let forecast = forest.extrapolate(10).unwrap();
    assert_eq!(forecast.len(), 10);
    for step in 0..10 {
        let truth = ((4000 + step) as f32 / 10.0).sin();
        let predicted = forecast.values[step];
        assert!(
            (predicted - truth).abs() < 0.3,
            "step {}: predicted {} vs {}",
            step,
            predicted,
            truth
        );
        assert!(forecast.lower[step] <= predicted && predicted <= forecast.upper[step]);
    }
}

#[test]
fn exact_near_neighbor_carries_its_sequence_index() {
    let mut forest = RandomCutForest::builder(3, 1)
        .number_of_trees(10)
        .sample_size(256)
        .output_after(50)
        .initial_accept_fraction(1.0)
        .store_sequence_indexes(true)
        .random_seed(29)
        .build()
        .unwrap();
    let data = datagen::gaussian(100, &[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0], 3);
    for (i, point) in data.iter().enumerate() {
        forest.update(point, i as u64).unwrap();
    }
    let target = &data[17];
    let neighbors = forest.near_neighbors(target, 1e-6).unwrap();
    assert_eq!(neighbors.len(), 1, "expected one merged neighbor");
    let neighbor = &neighbors[0];
    assert_eq!(neighbor.distance, 0.0);
    assert_eq!(neighbor.point, *target);
    assert_eq!(neighbor.sequence_indexes, vec![17]);
    assert_eq!(neighbor.trees, 10);

    // a distant query finds nothing within the threshold
    assert!(forest.near_neighbors(&[50.0, 50.0, 50.0], 1e-6).unwrap().is_empty());
}

#[test]
fn conditional_field_bounds_bracket_the_median() {
    let mut forest = RandomCutForest::builder(2, 1)
        .number_of_trees(30)
        .sample_size(128)
        .random_seed(19)
        .build()
        .unwrap();
    let data = datagen::noisy_line(1000, -1.0, 0.2, (0.0, 8.0), 23);
    for (i, point) in data.iter().enumerate() {
        forest.update(point, i as u64).unwrap();
    }
    let field = forest
        .core()
        .conditional_field(&[0.0, -4.0], &[0])
        .unwrap();
    assert!(field.lower[0] <= field.median[0]);
    assert!(field.median[0] <= field.upper[0]);
    // y = -x, so x should sit near 4
    assert!((field.median[0] - 4.0).abs() < 0.8);
}

#[test]
fn cyclic_extrapolation_rotates_through_the_shingle() {
    let mut forest = RandomCutForest::builder(4, 4)
        .number_of_trees(20)
        .sample_size(128)
        .random_seed(31)
        .build()
        .unwrap();
    let wave = datagen::noisy_sine(1500, 8.0, 1.0, 0.02, 5);
    for (i, &value) in wave.iter().enumerate() {
        forest.update(&[value], i as u64).unwrap();
    }
    let shingle = forest.preprocessor().unwrap().last_shingled_point().to_vec();
    let forecast = forest
        .core()
        .extrapolate_basic(&shingle, 4, 1, true, 0)
        .unwrap();
    assert_eq!(forecast.len(), 4);
    for value in &forecast.values {
        assert!(value.abs() <= 1.5);
    }
}
