use crate::common::divector::DiVector;
use crate::util::check_argument;
use crate::errors::Result;

/// Accepts per-tree results one at a time and declares convergence once
/// further trees are unlikely to move the estimate.
pub trait ConvergingAccumulator<R> {
    fn accept(&mut self, value: R);
    fn accepted(&self) -> usize;
    fn converged(&self) -> bool;
}

const WITNESS_DEVIATIONS: f64 = 0.5;

/// One-sided standard-deviation test: a new value witnesses the running
/// estimate unless it falls more than half a deviation below the running
/// mean; convergence needs ceil(1/precision) witnesses and at least
/// `min_values_accepted` values. The test is one-sided because anomaly
/// consumers only act on high scores; unusually low per-tree values
/// postpone convergence instead of dragging the estimate down silently.
pub struct OneSidedAccumulator {
    witness_target: usize,
    min_values_accepted: usize,
    sum: f64,
    sum_squared: f64,
    count: usize,
    witnesses: usize,
}

impl OneSidedAccumulator {
    pub fn new(precision: f64, min_values_accepted: usize) -> Result<Self> {
        check_argument(precision > 0.0 && precision <= 1.0, "precision must lie in (0, 1]")?;
        Ok(OneSidedAccumulator {
            witness_target: (1.0 / precision).ceil() as usize,
            min_values_accepted,
            sum: 0.0,
            sum_squared: 0.0,
            count: 0,
            witnesses: 0,
        })
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn witness_test(&self, value: f64) -> bool {
        if self.count == 0 {
            return true;
        }
        let mean = self.sum / self.count as f64;
        let variance = self.sum_squared / self.count as f64 - mean * mean;
        let deviation = if variance > 0.0 { variance.sqrt() } else { 0.0 };
        value > mean - WITNESS_DEVIATIONS * deviation
    }
}

impl ConvergingAccumulator<f64> for OneSidedAccumulator {
    fn accept(&mut self, value: f64) {
        if self.witness_test(value) {
            self.witnesses += 1;
        }
        self.sum += value;
        self.sum_squared += value * value;
        self.count += 1;
    }

    fn accepted(&self) -> usize {
        self.count
    }

    fn converged(&self) -> bool {
        self.count >= self.min_values_accepted && self.witnesses >= self.witness_target
    }
}

/// DiVector variant: the convergence test runs on the L1 norm while the
/// directional components accumulate for the final answer.
pub struct DiVectorAccumulator {
    scalar: OneSidedAccumulator,
    total: DiVector,
}

impl DiVectorAccumulator {
    pub fn new(dimensions: usize, precision: f64, min_values_accepted: usize) -> Result<Self> {
        Ok(DiVectorAccumulator {
            scalar: OneSidedAccumulator::new(precision, min_values_accepted)?,
            total: DiVector::empty(dimensions),
        })
    }

    pub fn mean(&self) -> DiVector {
        let mut answer = self.total.clone();
        if self.scalar.count > 0 {
            answer.divide(self.scalar.count);
        }
        answer
    }
}

impl ConvergingAccumulator<DiVector> for DiVectorAccumulator {
    fn accept(&mut self, value: DiVector) {
        self.scalar.accept(value.total());
        value.add_to(&mut self.total);
    }

    fn accepted(&self) -> usize {
        self.scalar.accepted()
    }

    fn converged(&self) -> bool {
        self.scalar.converged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_constant_values_converge_quickly() {
        let mut accumulator = OneSidedAccumulator::new(0.1, 5).unwrap();
        let mut i = 0usize;
        while !accumulator.converged() && i < 100 {
            // alternate slightly above and below the mean
            let value = if i % 2 == 0 { 2.01 } else { 1.99 };
            accumulator.accept(value);
            i += 1;
        }
        assert!(accumulator.converged());
        assert!(accumulator.accepted() <= 20 + 5);
        assert!((accumulator.mean() - 2.0).abs() < 0.02);
    }

    #[test]
    fn floor_prevents_premature_convergence() {
        let mut accumulator = OneSidedAccumulator::new(0.5, 10).unwrap();
        for _ in 0..5 {
            accumulator.accept(10.0);
        }
        assert!(!accumulator.converged());
    }

    #[test]
    fn divector_accumulator_averages_components() {
        let mut accumulator = DiVectorAccumulator::new(2, 0.5, 1).unwrap();
        accumulator.accept(DiVector::new(&[2.0, 0.0], &[0.0, 0.0]));
        accumulator.accept(DiVector::new(&[0.0, 0.0], &[0.0, 4.0]));
        let mean = accumulator.mean();
        assert_eq!(mean.high[0], 1.0);
        assert_eq!(mean.low[1], 2.0);
    }
}
