use crate::util::check_argument;
use crate::errors::Result;

/// A vector of values with per-coordinate upper and lower bounds, used to
/// report forecasts.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeVector {
    pub values: Vec<f32>,
    pub upper: Vec<f32>,
    pub lower: Vec<f32>,
}

impl RangeVector {
    pub fn new(dimensions: usize) -> Self {
        RangeVector {
            values: vec![0.0; dimensions],
            upper: vec![0.0; dimensions],
            lower: vec![0.0; dimensions],
        }
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        RangeVector {
            upper: values.clone(),
            lower: values.clone(),
            values,
        }
    }

    pub fn create(values: &[f32], upper: &[f32], lower: &[f32]) -> Result<Self> {
        check_argument(
            values.len() == upper.len() && values.len() == lower.len(),
            "mismatched lengths",
        )?;
        for i in 0..values.len() {
            check_argument(values[i] <= upper[i], "upper bound below value")?;
            check_argument(lower[i] <= values[i], "lower bound above value")?;
        }
        Ok(RangeVector {
            values: Vec::from(values),
            upper: Vec::from(upper),
            lower: Vec::from(lower),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn shift(&mut self, i: usize, shift: f32) {
        self.values[i] += shift;
        self.upper[i] += shift;
        self.lower[i] += shift;
        self.clamp(i);
    }

    pub fn scale(&mut self, i: usize, scale: f32) {
        self.values[i] *= scale;
        self.upper[i] *= scale;
        self.lower[i] *= scale;
        self.clamp(i);
    }

    /// Adds a running per-block total, turning a sequence of differences
    /// back into levels. `base` is the block that precedes position 0.
    pub fn cascaded_add(&mut self, base: &[f32]) -> Result<()> {
        check_argument(
            !base.is_empty() && self.values.len() % base.len() == 0,
            "base must divide the forecast length",
        )?;
        let width = base.len();
        let mut running: Vec<f32> = Vec::from(base);
        for block in 0..self.values.len() / width {
            for j in 0..width {
                let i = block * width + j;
                self.values[i] += running[j];
                self.upper[i] += running[j];
                self.lower[i] += running[j];
                running[j] = self.values[i];
                self.clamp(i);
            }
        }
        Ok(())
    }

    // float rounding can push a bound past its value
    fn clamp(&mut self, i: usize) {
        if self.upper[i] < self.values[i] {
            self.upper[i] = self.values[i];
        }
        if self.lower[i] > self.values[i] {
            self.lower[i] = self.values[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascaded_add_restores_levels() {
        let mut ranges = RangeVector::from_values(vec![1.0, 1.0, 1.0]);
        ranges.cascaded_add(&[10.0]).unwrap();
        assert_eq!(ranges.values, vec![11.0, 12.0, 13.0]);
    }

    #[test]
    fn create_rejects_inverted_bounds() {
        assert!(RangeVector::create(&[1.0], &[0.5], &[0.0]).is_err());
        assert!(RangeVector::create(&[1.0], &[1.5], &[1.2]).is_err());
    }
}
