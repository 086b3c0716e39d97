use crate::util::check_argument;
use crate::errors::Result;

/// Axis-aligned hull of a set of points, with the sum of side lengths
/// cached in f64 to bound drift under incremental growth.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    min: Vec<f32>,
    max: Vec<f32>,
    range_sum: f64,
}

impl BoundingBox {
    pub fn from_point(point: &[f32]) -> Self {
        BoundingBox {
            min: Vec::from(point),
            max: Vec::from(point),
            range_sum: 0.0,
        }
    }

    pub fn from_pair(first: &[f32], second: &[f32]) -> Result<Self> {
        check_argument(first.len() == second.len(), "mismatched lengths")?;
        let min: Vec<f32> = first
            .iter()
            .zip(second)
            .map(|(&x, &y)| if x < y { x } else { y })
            .collect();
        let max: Vec<f32> = first
            .iter()
            .zip(second)
            .map(|(&x, &y)| if x > y { x } else { y })
            .collect();
        let range_sum = min
            .iter()
            .zip(&max)
            .map(|(&lo, &hi)| (hi - lo) as f64)
            .sum();
        Ok(BoundingBox {
            min,
            max,
            range_sum,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    pub fn min_values(&self) -> &[f32] {
        &self.min
    }

    pub fn max_values(&self) -> &[f32] {
        &self.max
    }

    pub fn range_sum(&self) -> f64 {
        self.range_sum
    }

    /// Grows the hull to cover `point`. Returns true when the hull was
    /// already covering it (the range sum did not change).
    pub fn extend_point(&mut self, point: &[f32]) -> bool {
        let old_sum = self.range_sum;
        for (lo, &v) in self.min.iter_mut().zip(point) {
            if v < *lo {
                *lo = v;
            }
        }
        for (hi, &v) in self.max.iter_mut().zip(point) {
            if v > *hi {
                *hi = v;
            }
        }
        self.recompute_range_sum();
        old_sum == self.range_sum
    }

    pub fn extend_box(&mut self, other: &BoundingBox) {
        for (lo, &v) in self.min.iter_mut().zip(&other.min) {
            if v < *lo {
                *lo = v;
            }
        }
        for (hi, &v) in self.max.iter_mut().zip(&other.max) {
            if v > *hi {
                *hi = v;
            }
        }
        self.recompute_range_sum();
    }

    pub fn contains(&self, point: &[f32]) -> bool {
        self.min
            .iter()
            .zip(point)
            .zip(&self.max)
            .all(|((&lo, &v), &hi)| lo <= v && v <= hi)
    }

    /// Probability that a random cut on this box merged with `point`
    /// separates the point from the box.
    pub fn probability_of_cut(&self, point: &[f32]) -> f64 {
        let gap: f64 = self
            .min
            .iter()
            .zip(point)
            .zip(&self.max)
            .map(|((&lo, &v), &hi)| {
                if v < lo {
                    (lo - v) as f64
                } else if v > hi {
                    (v - hi) as f64
                } else {
                    0.0
                }
            })
            .sum();
        if gap == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            gap / (self.range_sum + gap)
        }
    }

    /// As `probability_of_cut`, ignoring masked coordinates.
    pub fn probability_of_cut_masked(&self, point: &[f32], missing: &[bool]) -> f64 {
        let gap: f64 = self
            .min
            .iter()
            .zip(point)
            .zip(&self.max)
            .zip(missing)
            .map(|(((&lo, &v), &hi), &skip)| {
                if skip {
                    0.0
                } else if v < lo {
                    (lo - v) as f64
                } else if v > hi {
                    (v - hi) as f64
                } else {
                    0.0
                }
            })
            .sum();
        if gap == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            gap / (self.range_sum + gap)
        }
    }

    fn recompute_range_sum(&mut self) {
        self.range_sum = self
            .min
            .iter()
            .zip(&self.max)
            .map(|(&lo, &hi)| (hi - lo) as f64)
            .sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_componentwise() {
        let mut bounding_box = BoundingBox::from_point(&[0.0, 1.0]);
        assert_eq!(bounding_box.range_sum(), 0.0);
        assert!(!bounding_box.extend_point(&[2.0, -1.0]));
        assert_eq!(bounding_box.min_values(), &[0.0, -1.0]);
        assert_eq!(bounding_box.max_values(), &[2.0, 1.0]);
        assert_eq!(bounding_box.range_sum(), 4.0);
        assert!(bounding_box.extend_point(&[1.0, 0.0]));
    }

    #[test]
    fn probability_of_cut_accounts_for_extension_only() {
        let bounding_box = BoundingBox::from_pair(&[0.0, 0.0], &[2.0, 2.0]).unwrap();
        assert_eq!(bounding_box.probability_of_cut(&[1.0, 1.0]), 0.0);
        let p = bounding_box.probability_of_cut(&[3.0, 1.0]);
        assert!((p - 1.0 / 5.0).abs() < 1e-12);
        assert!(bounding_box.contains(&[2.0, 0.0]));
        assert!(!bounding_box.contains(&[3.0, 1.0]));
    }

    #[test]
    fn degenerate_box_always_cuts_outside_points() {
        let bounding_box = BoundingBox::from_point(&[1.0]);
        assert_eq!(bounding_box.probability_of_cut(&[2.0]), 1.0);
        assert_eq!(bounding_box.probability_of_cut(&[1.0]), 0.0);
    }

    #[test]
    fn masked_coordinates_are_skipped() {
        let bounding_box = BoundingBox::from_pair(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let p = bounding_box.probability_of_cut_masked(&[5.0, 0.5], &[true, false]);
        assert_eq!(p, 0.0);
    }
}
