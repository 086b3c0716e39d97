use crate::tree::bounding_box::BoundingBox;

pub(crate) const NO_CUT: usize = usize::MAX;

/// A candidate cut; nodes store this information unpacked.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Cut {
    pub dimension: usize,
    pub value: f32,
}

impl Cut {
    pub fn none() -> Self {
        Cut {
            dimension: NO_CUT,
            value: 0.0,
        }
    }

    /// Draws the cut at position `factor` (in (0,1)) of the total range of
    /// `bounding_box` merged with `point`: the cut dimension is selected
    /// with probability proportional to the merged per-dimension range and
    /// the value is uniform within it. Returns the cut and whether it
    /// separates `point` from the box.
    ///
    /// If rounding lands the value on or outside the open interval it is
    /// clamped to the interval minimum, which still separates whenever the
    /// point extends the box on the low side.
    pub fn random_cut_and_separation(
        bounding_box: &BoundingBox,
        factor: f64,
        point: &[f32],
    ) -> (Cut, bool) {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let extension: f64 = min_values
            .iter()
            .zip(max_values)
            .zip(point)
            .map(|((&lo, &hi), &v)| {
                if v < lo {
                    (lo - v) as f64
                } else if v > hi {
                    (v - hi) as f64
                } else {
                    0.0
                }
            })
            .sum();
        if extension == 0.0 {
            // the point lies inside the box; no cut can separate it
            return (Cut::none(), false);
        }

        let mut remainder = (bounding_box.range_sum() + extension) * factor;
        let mut dimension = point.len() - 1;
        let mut value = f32::MAX;
        for d in 0..point.len() {
            let lo = if point[d] < min_values[d] {
                point[d]
            } else {
                min_values[d]
            };
            let hi = if point[d] > max_values[d] {
                point[d]
            } else {
                max_values[d]
            };
            let gap = (hi - lo) as f64;
            if gap > remainder || (gap == remainder && d == point.len() - 1) {
                value = lo + remainder as f32; // precision lost here
                if value <= lo || value >= hi {
                    value = lo;
                }
                dimension = d;
                break;
            }
            remainder -= gap;
        }
        if value == f32::MAX {
            // rounding consumed the whole range; fall back to the last
            // dimension with any width
            let d = (0..point.len())
                .rev()
                .find(|&d| {
                    point[d].min(min_values[d]) < point[d].max(max_values[d])
                })
                .unwrap_or(point.len() - 1);
            dimension = d;
            value = point[d].min(min_values[d]);
        }

        let lo_box = min_values[dimension];
        let hi_box = max_values[dimension];
        let separation = (point[dimension] <= value && value < lo_box)
            || (hi_box <= value && value < point[dimension]);
        (Cut { dimension, value }, separation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_in_the_gap_separates() {
        let bounding_box = BoundingBox::from_pair(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        // total merged range is 1 + 4 = 5; factor 0.5 puts the cut at 2.5
        // into dimension 1, whose merged interval is [0, 4]
        let (cut, separated) =
            Cut::random_cut_and_separation(&bounding_box, 0.5, &[0.5, 4.0]);
        assert_eq!(cut.dimension, 1);
        assert!(separated);
        assert!(cut.value > 1.0 && cut.value < 4.0);
    }

    #[test]
    fn cut_inside_the_box_does_not_separate() {
        let bounding_box = BoundingBox::from_pair(&[0.0, 0.0], &[1.0, 4.0]).unwrap();
        let (cut, separated) =
            Cut::random_cut_and_separation(&bounding_box, 0.1, &[0.5, 5.0]);
        assert!(!separated);
        assert_ne!(cut.dimension, NO_CUT);
    }

    #[test]
    fn interior_point_yields_no_cut() {
        let bounding_box = BoundingBox::from_pair(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let (cut, separated) =
            Cut::random_cut_and_separation(&bounding_box, 0.7, &[0.5, 0.5]);
        assert_eq!(cut.dimension, NO_CUT);
        assert!(!separated);
    }

    #[test]
    fn degenerate_box_separates_on_the_differing_dimension() {
        let bounding_box = BoundingBox::from_point(&[1.0, 1.0]);
        let (cut, separated) =
            Cut::random_cut_and_separation(&bounding_box, 0.5, &[1.0, 3.0]);
        assert_eq!(cut.dimension, 1);
        assert!(separated);
    }
}
