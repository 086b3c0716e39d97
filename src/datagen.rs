//! Reproducible synthetic streams for tests and examples.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal, Uniform};

/// `num` vectors of independent Normal(mean[j], scale[j]) coordinates.
pub fn gaussian(num: usize, mean: &[f32], scale: &[f32], seed: u64) -> Vec<Vec<f32>> {
    assert!(mean.len() == scale.len(), "mismatched lengths");
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let distributions: Vec<Normal<f64>> = mean
        .iter()
        .zip(scale)
        .map(|(&m, &s)| Normal::new(m as f64, s as f64).expect("scale must be finite"))
        .collect();
    (0..num)
        .map(|_| {
            distributions
                .iter()
                .map(|d| d.sample(&mut rng) as f32)
                .collect()
        })
        .collect()
}

/// 2D points on y = slope * x + Normal(0, noise) with x uniform over
/// `x_range`.
pub fn noisy_line(
    num: usize,
    slope: f32,
    noise: f32,
    x_range: (f32, f32),
    seed: u64,
) -> Vec<Vec<f32>> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let xs = Uniform::new(x_range.0 as f64, x_range.1 as f64);
    let z = Normal::new(0.0, noise as f64).expect("noise must be finite");
    (0..num)
        .map(|_| {
            let x = xs.sample(&mut rng) as f32;
            let y = slope * x + z.sample(&mut rng) as f32;
            vec![x, y]
        })
        .collect()
}

/// `num` samples of amplitude * sin(t / period) + Normal(0, noise).
pub fn noisy_sine(num: usize, period: f32, amplitude: f32, noise: f32, seed: u64) -> Vec<f32> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let z = Normal::new(0.0, noise.max(f32::MIN_POSITIVE) as f64).expect("noise must be finite");
    (0..num)
        .map(|t| {
            let clean = amplitude * (t as f32 / period).sin();
            if noise > 0.0 {
                clean + z.sample(&mut rng) as f32
            } else {
                clean
            }
        })
        .collect()
}
