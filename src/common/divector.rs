use crate::tree::bounding_box::BoundingBox;

/// A directional vector with a high and a low component per dimension.
///
/// Attribution and density results are reported as di-vectors: the high
/// component of dimension i carries the part of the quantity explained by
/// the query being unusually large in that dimension, the low component
/// the part explained by it being unusually small.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiVector {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
}

impl DiVector {
    pub fn empty(dimensions: usize) -> Self {
        DiVector {
            high: vec![0.0; dimensions],
            low: vec![0.0; dimensions],
        }
    }

    pub fn new(high: &[f64], low: &[f64]) -> Self {
        assert!(high.len() == low.len(), "mismatched component lengths");
        DiVector {
            high: Vec::from(high),
            low: Vec::from(low),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.high.len()
    }

    pub fn total(&self) -> f64 {
        self.high.iter().sum::<f64>() + self.low.iter().sum::<f64>()
    }

    pub fn high_low_sum(&self, index: usize) -> f64 {
        self.high[index] + self.low[index]
    }

    pub fn scale(&mut self, factor: f64) {
        for x in self.high.iter_mut() {
            *x *= factor;
        }
        for x in self.low.iter_mut() {
            *x *= factor;
        }
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
    }

    pub fn add_to(&self, other: &mut DiVector) {
        for (x, &y) in other.high.iter_mut().zip(&self.high) {
            *x += y;
        }
        for (x, &y) in other.low.iter_mut().zip(&self.low) {
            *x += y;
        }
    }

    pub fn add_scaled(&mut self, other: &DiVector, factor: f64) {
        for (x, &y) in self.high.iter_mut().zip(&other.high) {
            *x += y * factor;
        }
        for (x, &y) in self.low.iter_mut().zip(&other.low) {
            *x += y * factor;
        }
    }

    /// Rescales so the high+low total equals `value`. A zero total is
    /// spread uniformly over every component.
    pub fn normalize(&mut self, value: f64) {
        let current = self.total();
        if current <= 0.0 {
            let spread = value / (2.0 * self.high.len() as f64);
            self.high.fill(spread);
            self.low.fill(spread);
        } else {
            self.scale(value / current);
        }
    }

    /// Overwrites this vector with the per-dimension probability that a
    /// random cut on `bounding_box` merged with `point` separates the
    /// point, split by the side the point escapes on. The components sum
    /// to the scalar probability of separation.
    pub fn assign_probability_of_cut(&mut self, bounding_box: &BoundingBox, point: &[f32]) {
        let min_gap: f64 = self
            .low
            .iter_mut()
            .zip(bounding_box.min_values())
            .zip(point)
            .map(|((x, &lo), &v)| {
                *x = if lo > v { (lo - v) as f64 } else { 0.0 };
                *x
            })
            .sum();
        let max_gap: f64 = self
            .high
            .iter_mut()
            .zip(point)
            .zip(bounding_box.max_values())
            .map(|((x, &v), &hi)| {
                *x = if v > hi { (v - hi) as f64 } else { 0.0 };
                *x
            })
            .sum();
        let gap = min_gap + max_gap;
        if gap != 0.0 {
            self.scale(1.0 / (bounding_box.range_sum() + gap));
        }
    }

    /// As `assign_probability_of_cut`, skipping masked coordinates.
    pub fn assign_probability_of_cut_masked(
        &mut self,
        bounding_box: &BoundingBox,
        point: &[f32],
        missing: &[bool],
    ) {
        let min_gap: f64 = self
            .low
            .iter_mut()
            .zip(bounding_box.min_values())
            .zip(point)
            .zip(missing)
            .map(|(((x, &lo), &v), &skip)| {
                *x = if !skip && lo > v { (lo - v) as f64 } else { 0.0 };
                *x
            })
            .sum();
        let max_gap: f64 = self
            .high
            .iter_mut()
            .zip(point)
            .zip(bounding_box.max_values())
            .zip(missing)
            .map(|(((x, &v), &hi), &skip)| {
                *x = if !skip && v > hi { (v - hi) as f64 } else { 0.0 };
                *x
            })
            .sum();
        let gap = min_gap + max_gap;
        if gap != 0.0 {
            self.scale(1.0 / (bounding_box.range_sum() + gap));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_assignment_sums_to_separation_probability() {
        let bounding_box = BoundingBox::from_pair(&[0.0, 0.0], &[1.0, 2.0]).unwrap();
        let mut vector = DiVector::empty(2);
        vector.assign_probability_of_cut(&bounding_box, &[2.0, -1.0]);
        // extension is 1 above dimension 0 and 1 below dimension 1
        let expected = 2.0 / (3.0 + 2.0);
        assert!((vector.total() - expected).abs() < 1e-12);
        assert!(vector.high[0] > 0.0 && vector.low[1] > 0.0);
        assert_eq!(vector.low[0], 0.0);
        assert_eq!(vector.high[1], 0.0);
    }

    #[test]
    fn normalize_spreads_zero_totals() {
        let mut vector = DiVector::empty(2);
        vector.normalize(1.0);
        assert!((vector.total() - 1.0).abs() < 1e-12);
        assert_eq!(vector.high[0], 0.25);
    }
}
