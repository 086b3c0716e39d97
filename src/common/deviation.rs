/// A discounted mean/deviation sketch. The discount biases the statistics
/// towards recent observations; a discount of zero is a plain running
/// average.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Deviation {
    pub discount: f64,
    pub weight: f64,
    pub sum: f64,
    pub sum_squared: f64,
    pub count: u64,
}

impl Deviation {
    pub fn new(discount: f64) -> crate::errors::Result<Self> {
        crate::util::check_argument(
            (0.0..1.0).contains(&discount),
            "discount must lie in [0, 1)",
        )?;
        Ok(Deviation {
            discount,
            weight: 0.0,
            sum: 0.0,
            sum_squared: 0.0,
            count: 0,
        })
    }

    pub fn update(&mut self, value: f64) {
        // the early factor ramps up slowly so a cold sketch is not pinned
        // to its first few observations
        let factor = if self.discount == 0.0 {
            1.0
        } else {
            (1.0 - self.discount).min(1.0 - 1.0 / (self.count + 2) as f64)
        };
        self.sum = self.sum * factor + value;
        self.sum_squared = self.sum_squared * factor + value * value;
        self.weight = self.weight * factor + 1.0;
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.sum / self.weight
        }
    }

    pub fn deviation(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let mean = self.sum / self.weight;
        let variance = self.sum_squared / self.weight - mean * mean;
        if variance > 0.0 {
            variance.sqrt()
        } else {
            0.0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.weight <= 0.0
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undiscounted_mean_matches_average() {
        let mut deviation = Deviation::new(0.0).unwrap();
        for value in [1.0, 2.0, 3.0, 4.0] {
            deviation.update(value);
        }
        assert!((deviation.mean() - 2.5).abs() < 1e-12);
        assert!(deviation.deviation() > 0.0);
    }

    #[test]
    fn discounting_tracks_recent_values() {
        let mut deviation = Deviation::new(0.1).unwrap();
        for _ in 0..200 {
            deviation.update(0.0);
        }
        for _ in 0..200 {
            deviation.update(10.0);
        }
        assert!(deviation.mean() > 8.0);
    }

    #[test]
    fn rejects_bad_discount() {
        assert!(Deviation::new(1.0).is_err());
        assert!(Deviation::new(-0.1).is_err());
    }
}
