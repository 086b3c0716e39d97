use crate::common::divector::DiVector;
use crate::tree::bounding_box::BoundingBox;

/// Directional interpolation state accumulated along a traversal and
/// summed across trees: a signed measure, directional distances to the
/// visited boxes and the directional probability mass.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InterpolationMeasure {
    pub measure: DiVector,
    pub distance: DiVector,
    pub probability_mass: DiVector,
    pub sample_size: f64,
}

impl InterpolationMeasure {
    pub fn empty(dimensions: usize, sample_size: f64) -> Self {
        InterpolationMeasure {
            measure: DiVector::empty(dimensions),
            distance: DiVector::empty(dimensions),
            probability_mass: DiVector::empty(dimensions),
            sample_size,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.measure.dimensions()
    }

    pub fn add_to(&self, other: &mut InterpolationMeasure) {
        self.measure.add_to(&mut other.measure);
        self.distance.add_to(&mut other.distance);
        self.probability_mass.add_to(&mut other.probability_mass);
        other.sample_size += self.sample_size;
    }

    pub fn scale(&mut self, factor: f64) {
        self.measure.scale(factor);
        self.distance.scale(factor);
        self.probability_mass.scale(factor);
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
        self.sample_size /= count as f64;
    }

    /// Folds one traversal step into the accumulated state. Returns the
    /// probability that a random cut on `bounding_box` merged with the
    /// query separates the query; the previously accumulated state is
    /// damped by the complementary probability.
    pub fn update(&mut self, point: &[f32], bounding_box: &BoundingBox, measure: f64) -> f64 {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let gap: f64 = point
            .iter()
            .zip(min_values)
            .zip(max_values)
            .map(|((&v, &lo), &hi)| {
                if v < lo {
                    (lo - v) as f64
                } else if v > hi {
                    (v - hi) as f64
                } else {
                    0.0
                }
            })
            .sum();
        let new_range = gap + bounding_box.range_sum();
        if gap <= 0.0 || new_range <= 0.0 {
            return 0.0;
        }
        let probability = gap / new_range;
        self.scale(1.0 - probability);
        for i in 0..point.len() {
            if point[i] > max_values[i] {
                let t = (point[i] - max_values[i]) as f64 / new_range;
                self.distance.high[i] += t * (point[i] - min_values[i]) as f64;
                self.probability_mass.high[i] += t;
                self.measure.high[i] += measure * t;
            } else if point[i] < min_values[i] {
                let t = (min_values[i] - point[i]) as f64 / new_range;
                self.distance.low[i] += t * (max_values[i] - point[i]) as f64;
                self.probability_mass.low[i] += t;
                self.measure.low[i] += measure * t;
            }
        }
        probability
    }

    /// Directional density: the accumulated measure scaled down by the
    /// manifold-volume factors implied by the per-dimension distances.
    pub fn directional_measure(&self, threshold: f64, manifold_dimension: f64) -> DiVector {
        assert!(
            self.sample_size >= 0.0 && self.measure.total() >= 0.0,
            "negative samples or measure"
        );
        if self.sample_size == 0.0 || self.measure.total() == 0.0 {
            return DiVector::empty(self.dimensions());
        }
        let mut sum_of_factors = 0.0;
        for i in 0..self.dimensions() {
            let mass = self.probability_mass.high_low_sum(i);
            let mut factor = if mass > 0.0 {
                self.distance.high_low_sum(i) / mass
            } else {
                0.0
            };
            if factor > 0.0 {
                factor = (factor.ln() * manifold_dimension).exp() * mass;
            }
            sum_of_factors += factor;
        }
        let mut answer = self.measure.clone();
        answer.scale(1.0 / (threshold + sum_of_factors));
        answer
    }

    pub fn directional_density(&self) -> DiVector {
        self.directional_measure(1e-3, self.dimensions() as f64)
    }

    pub fn density(&self) -> f64 {
        self.directional_density().total()
    }
}

/// Result of a density query.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DensityOutput {
    pub density: f64,
    pub directional: DiVector,
}

impl DensityOutput {
    pub fn from_measure(measure: &InterpolationMeasure) -> Self {
        let directional = measure.directional_density();
        DensityOutput {
            density: directional.total(),
            directional,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_inside_box_is_a_no_op() {
        let bounding_box = BoundingBox::from_pair(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let mut measure = InterpolationMeasure::empty(2, 1.0);
        let p = measure.update(&[0.5, 0.5], &bounding_box, 1.0);
        assert_eq!(p, 0.0);
        assert_eq!(measure.measure.total(), 0.0);
    }

    #[test]
    fn update_outside_box_accumulates_directionally() {
        let bounding_box = BoundingBox::from_pair(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let mut measure = InterpolationMeasure::empty(2, 1.0);
        let p = measure.update(&[3.0, 0.5], &bounding_box, 1.0);
        assert!(p > 0.0);
        assert!(measure.measure.high[0] > 0.0);
        assert_eq!(measure.measure.low[0], 0.0);
        assert!(measure.density() > 0.0);
    }
}
