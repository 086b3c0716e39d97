use crate::common::deviation::Deviation;
use crate::common::rangevector::RangeVector;
use crate::config::TransformMethod;
use crate::util::check_argument;
use crate::errors::Result;

pub(crate) const DEVIATION_BANKS: usize = 5;

/// Per-dimension transform between input space and tree space.
///
/// Five discounted sketches per dimension back the transform: the value,
/// the first difference, and smoothed copies of the value deviation, the
/// difference mean (drift) and the difference deviation. Normalized
/// magnitudes are clamped at `clip_factor`; per-dimension weights apply
/// after the method in both directions.
#[derive(Clone)]
pub struct Transformer {
    pub(crate) method: TransformMethod,
    pub(crate) input_dimensions: usize,
    pub(crate) weights: Vec<f32>,
    pub(crate) clip_factor: f32,
    pub(crate) deviations: Vec<Deviation>,
}

impl Transformer {
    pub fn new(
        method: TransformMethod,
        input_dimensions: usize,
        transform_decay: f64,
        weights: &[f32],
        clip_factor: f32,
    ) -> Result<Self> {
        check_argument(
            weights.len() == input_dimensions,
            "one weight per input dimension",
        )?;
        check_argument(clip_factor > 0.0, "clip factor must be positive")?;
        let mut deviations = Vec::with_capacity(DEVIATION_BANKS * input_dimensions);
        for _ in 0..2 * input_dimensions {
            deviations.push(Deviation::new(transform_decay)?);
        }
        // the smoothed banks decay an order of magnitude slower
        for _ in 0..(DEVIATION_BANKS - 2) * input_dimensions {
            deviations.push(Deviation::new(0.1 * transform_decay)?);
        }
        Ok(Transformer {
            method,
            input_dimensions,
            weights: Vec::from(weights),
            clip_factor,
            deviations,
        })
    }

    pub fn update(&mut self, input: &[f32], previous: &[f32]) {
        let d = self.input_dimensions;
        for i in 0..d {
            self.deviations[i].update(input[i] as f64);
            let deviation = self.deviations[i].deviation();
            self.deviations[d + i].update((input[i] - previous[i]) as f64);
            let difference_mean = self.deviations[d + i].mean();
            let difference_deviation = self.deviations[d + i].deviation();
            self.deviations[2 * d + i].update(deviation);
            self.deviations[3 * d + i].update(difference_mean);
            self.deviations[4 * d + i].update(difference_deviation);
        }
    }

    pub fn transform(&self, input: &[f32], previous: &[f32]) -> Vec<f32> {
        let mut answer = Vec::from(input);
        match self.method {
            TransformMethod::None => {}
            TransformMethod::Difference => {
                for (x, &p) in answer.iter_mut().zip(previous) {
                    *x -= p;
                }
            }
            TransformMethod::Normalize => {
                for i in 0..answer.len() {
                    answer[i] = self.clip((answer[i] - self.shift_of(i)) / self.scale_of(i));
                }
            }
            TransformMethod::NormalizeDifference => {
                for i in 0..answer.len() {
                    answer[i] = self.clip((answer[i] - previous[i]) / self.scale_of(i));
                }
            }
        }
        for (x, &w) in answer.iter_mut().zip(&self.weights) {
            *x *= w;
        }
        answer
    }

    pub fn invert(&self, block: &[f32], previous: &[f32]) -> Vec<f32> {
        let mut answer: Vec<f32> = block
            .iter()
            .zip(&self.weights)
            .map(|(&x, &w)| if w == 0.0 { 0.0 } else { x / w })
            .collect();
        match self.method {
            TransformMethod::None => {}
            TransformMethod::Difference => {
                for (x, &p) in answer.iter_mut().zip(previous) {
                    *x += p;
                }
            }
            TransformMethod::Normalize => {
                for i in 0..answer.len() {
                    answer[i] = answer[i] * self.scale_of(i) + self.shift_of(i);
                }
            }
            TransformMethod::NormalizeDifference => {
                for i in 0..answer.len() {
                    answer[i] = answer[i] * self.scale_of(i) + previous[i];
                }
            }
        }
        answer
    }

    /// Undoes the transform on a tree-space forecast, reintroducing the
    /// per-step drift and, for difference methods, the running level.
    pub fn invert_forecast(&self, forecast: &mut RangeVector, previous: &[f32]) -> Result<()> {
        let d = self.input_dimensions;
        check_argument(forecast.len() % d == 0, "forecast length mismatch")?;
        let horizon = forecast.len() / d;
        for step in 0..horizon {
            for j in 0..d {
                let at = step * d + j;
                let factor = if self.weights[j] == 0.0 {
                    0.0
                } else {
                    1.0 / self.weights[j]
                };
                forecast.scale(at, factor);
                if matches!(
                    self.method,
                    TransformMethod::Normalize | TransformMethod::NormalizeDifference
                ) {
                    forecast.scale(at, self.scale_of(j));
                }
                forecast.shift(at, step as f32 * self.drift_of(j));
                if self.method == TransformMethod::Normalize {
                    forecast.shift(at, self.shift_of(j));
                }
            }
        }
        if matches!(
            self.method,
            TransformMethod::Difference | TransformMethod::NormalizeDifference
        ) {
            forecast.cascaded_add(previous)?;
        }
        Ok(())
    }

    /// Current per-dimension multiplicative factor between input and tree
    /// space.
    pub fn scale(&self) -> Vec<f32> {
        let mut answer = self.weights.clone();
        if matches!(
            self.method,
            TransformMethod::Normalize | TransformMethod::NormalizeDifference
        ) {
            for i in 0..self.input_dimensions {
                answer[i] *= self.scale_of(i);
            }
        }
        answer
    }

    /// Current per-dimension additive shift; doubles as the typical value
    /// used by fast-forwarded gap fill.
    pub fn shift(&self) -> Vec<f32> {
        (0..self.input_dimensions).map(|i| self.shift_of(i)).collect()
    }

    pub fn difference_deviations(&self) -> Vec<f32> {
        let d = self.input_dimensions;
        (0..d)
            .map(|i| self.deviations[4 * d + i].mean() as f32)
            .collect()
    }

    fn shift_of(&self, i: usize) -> f32 {
        self.deviations[i].mean() as f32
    }

    fn scale_of(&self, i: usize) -> f32 {
        (self.deviations[2 * self.input_dimensions + i].mean() + 1.0) as f32
    }

    fn drift_of(&self, i: usize) -> f32 {
        self.deviations[3 * self.input_dimensions + i].mean() as f32
    }

    fn clip(&self, value: f32) -> f32 {
        value.clamp(-self.clip_factor, self.clip_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primed(method: TransformMethod) -> Transformer {
        let mut transformer = Transformer::new(method, 2, 0.01, &[1.0, 1.0], 100.0).unwrap();
        let mut previous = vec![0.0, 0.0];
        for i in 0..100 {
            let input = vec![10.0 + (i % 5) as f32, -4.0];
            transformer.update(&input, &previous);
            previous = input;
        }
        transformer
    }

    #[test]
    fn transform_then_invert_is_identity() {
        for method in [
            TransformMethod::None,
            TransformMethod::Difference,
            TransformMethod::Normalize,
            TransformMethod::NormalizeDifference,
        ] {
            let transformer = primed(method);
            let previous = vec![12.0, -4.0];
            let input = vec![13.0, -3.5];
            let forward = transformer.transform(&input, &previous);
            let back = transformer.invert(&forward, &previous);
            for (x, y) in back.iter().zip(&input) {
                assert!((x - y).abs() < 1e-3, "method {:?}", method);
            }
        }
    }

    #[test]
    fn normalization_centers_the_stream() {
        let transformer = primed(TransformMethod::Normalize);
        let previous = vec![12.0, -4.0];
        let transformed = transformer.transform(&[12.0, -4.0], &previous);
        // the stream hovers around (12, -4), so the z-scores are small
        assert!(transformed[0].abs() < 2.0);
        assert!(transformed[1].abs() < 0.5);
    }

    #[test]
    fn clip_bounds_normalized_magnitudes() {
        let mut transformer =
            Transformer::new(TransformMethod::Normalize, 1, 0.01, &[1.0], 3.0).unwrap();
        let mut previous = vec![0.0];
        for _ in 0..50 {
            transformer.update(&[1.0], &previous);
            previous = vec![1.0];
        }
        let transformed = transformer.transform(&[1e9], &previous);
        assert!(transformed[0] <= 3.0);
    }

    #[test]
    fn forecast_inversion_restores_levels_for_differences() {
        let transformer = primed(TransformMethod::Difference);
        let mut forecast = RangeVector::from_values(vec![1.0, 0.0, 1.0, 0.0]);
        transformer.invert_forecast(&mut forecast, &[10.0, -4.0]).unwrap();
        // two blocks of two dimensions; levels accumulate per dimension
        assert!((forecast.values[0] - 11.0).abs() < 0.5);
        assert!((forecast.values[2] - 12.0).abs() < 1.0);
    }
}
