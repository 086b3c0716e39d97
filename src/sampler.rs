use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::util::{check_argument, check_state};
use crate::errors::Result;

pub(crate) const NO_POINT: usize = usize::MAX;

/// One reservoir entry: the time-biased weight, the point handle and the
/// sequence index the point was admitted under.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightedSample {
    pub weight: f32,
    pub point_index: usize,
    pub sequence_index: u64,
}

/// Time-biased reservoir sampler (Efraimidis-Spirakis weights with an
/// exponential time decay), kept as an array-backed binary max-heap so
/// the next eviction candidate is always at the top.
///
/// `accept_point` stages a decision; `add_point` commits it with the
/// handle the tree actually referenced. A decay change is folded into the
/// stored weights lazily, as a single accumulated delta, before the next
/// insertion or sample read.
pub struct ReservoirSampler {
    pub(crate) capacity: usize,
    pub(crate) weights: Vec<f32>,
    pub(crate) points: Vec<usize>,
    pub(crate) sequences: Vec<u64>,
    pub(crate) size: usize,
    pub(crate) time_decay: f64,
    pub(crate) initial_accept_fraction: f64,
    pub(crate) random_seed: u64,
    pub(crate) last_sequence_seen: u64,
    pub(crate) pending_weight: Option<(f32, u64)>,
    pub(crate) evicted: Option<WeightedSample>,
    pub(crate) accumulated_decay_delta: f64,
}

impl ReservoirSampler {
    pub fn new(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        random_seed: u64,
    ) -> Result<Self> {
        check_argument(capacity > 0, "sampler capacity must be positive")?;
        check_argument(time_decay >= 0.0, "time decay cannot be negative")?;
        check_argument(
            initial_accept_fraction > 0.0 && initial_accept_fraction <= 1.0,
            "initial accept fraction must lie in (0, 1]",
        )?;
        Ok(ReservoirSampler {
            capacity,
            weights: vec![0.0; capacity],
            points: vec![NO_POINT; capacity],
            sequences: vec![0; capacity],
            size: 0,
            time_decay,
            initial_accept_fraction,
            random_seed,
            last_sequence_seen: 0,
            pending_weight: None,
            evicted: None,
            accumulated_decay_delta: 0.0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    pub fn fill_fraction(&self) -> f64 {
        self.size as f64 / self.capacity as f64
    }

    /// Decides whether the point offered at `sequence_index` enters the
    /// sample. On acceptance the weight is staged and, if the reservoir
    /// was full, the evicted entry becomes available via `take_evicted`.
    pub fn accept_point(&mut self, sequence_index: u64) -> bool {
        self.reconcile_weights();
        self.last_sequence_seen = sequence_index;
        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();
        let weight = self.draw_weight(sequence_index, &mut rng);
        self.evicted = None;

        if !self.is_full() {
            let accept: f64 = rng.gen();
            if accept < self.initial_accept_probability() {
                self.pending_weight = Some((weight, sequence_index));
                return true;
            }
            self.pending_weight = None;
            return false;
        }
        if weight < self.weights[0] {
            self.evicted = Some(self.evict_max());
            self.pending_weight = Some((weight, sequence_index));
            return true;
        }
        self.pending_weight = None;
        false
    }

    pub fn take_evicted(&mut self) -> Option<WeightedSample> {
        self.evicted.take()
    }

    /// Commits the staged acceptance, binding it to the handle the tree
    /// referenced (which differs from the offered handle for duplicates).
    pub fn add_point(&mut self, point_index: usize) -> Result<()> {
        let (weight, sequence_index) = self.pending_weight.take().ok_or(
            crate::errors::RcfError::InvariantViolation {
                msg: "add_point without a staged acceptance",
            },
        )?;
        check_state(self.size < self.capacity, "sampler overflow")?;
        let mut current = self.size;
        self.weights[current] = weight;
        self.points[current] = point_index;
        self.sequences[current] = sequence_index;
        self.size += 1;
        while current > 0 {
            let up = (current - 1) / 2;
            if self.weights[up] < self.weights[current] {
                self.swap(current, up);
                current = up;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Pops the maximum-weight entry; usable repeatedly to shrink the
    /// sample.
    pub fn evict_max(&mut self) -> WeightedSample {
        let top = WeightedSample {
            weight: self.weights[0],
            point_index: self.points[0],
            sequence_index: self.sequences[0],
        };
        self.size -= 1;
        let last = self.size;
        self.weights[0] = self.weights[last];
        self.points[0] = self.points[last];
        self.sequences[0] = self.sequences[last];
        self.points[last] = NO_POINT;
        self.sift_down(0);
        top
    }

    /// The stored entries with decay reconciliation applied.
    pub fn samples(&mut self) -> Vec<WeightedSample> {
        self.reconcile_weights();
        (0..self.size)
            .map(|i| WeightedSample {
                weight: self.weights[i],
                point_index: self.points[i],
                sequence_index: self.sequences[i],
            })
            .collect()
    }

    /// Changes the decay rate mid-stream. The bookkeeping delta keeps the
    /// stored weights comparable with weights drawn under the new rate
    /// and is subtracted lazily.
    pub fn set_time_decay(&mut self, time_decay: f64) -> Result<()> {
        check_argument(time_decay >= 0.0, "time decay cannot be negative")?;
        self.accumulated_decay_delta +=
            (time_decay - self.time_decay) * self.last_sequence_seen as f64;
        self.time_decay = time_decay;
        Ok(())
    }

    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    fn draw_weight(&self, sequence_index: u64, rng: &mut ChaCha20Rng) -> f32 {
        loop {
            let u: f64 = rng.gen();
            let weight = f64::ln(-f64::ln(u)) - self.time_decay * sequence_index as f64;
            if weight.is_finite() {
                return weight as f32;
            }
        }
    }

    // probability 1 until the configured fill fraction, then a linear
    // ramp down to 0 at full
    fn initial_accept_probability(&self) -> f64 {
        let fill = self.fill_fraction();
        if fill < self.initial_accept_fraction {
            1.0
        } else if self.initial_accept_fraction >= 1.0 {
            0.0
        } else {
            1.0 - (fill - self.initial_accept_fraction) / (1.0 - self.initial_accept_fraction)
        }
    }

    fn reconcile_weights(&mut self) {
        if self.accumulated_decay_delta != 0.0 {
            let delta = self.accumulated_decay_delta as f32;
            for weight in self.weights[..self.size].iter_mut() {
                *weight -= delta;
            }
            self.accumulated_decay_delta = 0.0;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.weights.swap(a, b);
        self.points.swap(a, b);
        self.sequences.swap(a, b);
    }

    fn sift_down(&mut self, start: usize) {
        let mut current = start;
        while 2 * current + 1 < self.size {
            let mut largest = 2 * current + 1;
            let right = largest + 1;
            if right < self.size && self.weights[right] > self.weights[largest] {
                largest = right;
            }
            if self.weights[largest] > self.weights[current] {
                self.swap(current, largest);
                current = largest;
            } else {
                break;
            }
        }
    }
}

/// Plain captured state of a sampler.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplerState {
    pub capacity: usize,
    pub weights: Vec<f32>,
    pub points: Vec<usize>,
    pub sequences: Vec<u64>,
    pub size: usize,
    pub time_decay: f64,
    pub initial_accept_fraction: f64,
    pub random_seed: u64,
    pub last_sequence_seen: u64,
    pub accumulated_decay_delta: f64,
}

impl ReservoirSampler {
    pub fn to_state(&self) -> SamplerState {
        SamplerState {
            capacity: self.capacity,
            weights: self.weights.clone(),
            points: self.points.clone(),
            sequences: self.sequences.clone(),
            size: self.size,
            time_decay: self.time_decay,
            initial_accept_fraction: self.initial_accept_fraction,
            random_seed: self.random_seed,
            last_sequence_seen: self.last_sequence_seen,
            accumulated_decay_delta: self.accumulated_decay_delta,
        }
    }

    pub fn from_state(state: SamplerState) -> Result<Self> {
        check_argument(
            state.weights.len() == state.capacity && state.points.len() == state.capacity,
            "mismatched sampler arrays",
        )?;
        check_argument(state.size <= state.capacity, "sampler size exceeds capacity")?;
        Ok(ReservoirSampler {
            capacity: state.capacity,
            weights: state.weights,
            points: state.points,
            sequences: state.sequences,
            size: state.size,
            time_decay: state.time_decay,
            initial_accept_fraction: state.initial_accept_fraction,
            random_seed: state.random_seed,
            last_sequence_seen: state.last_sequence_seen,
            pending_weight: None,
            evicted: None,
            accumulated_decay_delta: state.accumulated_decay_delta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(sampler: &mut ReservoirSampler, from: u64, to: u64) {
        for seq in from..to {
            if sampler.accept_point(seq) {
                let evicted = sampler.take_evicted();
                sampler.add_point(seq as usize).unwrap();
                let _ = evicted;
            }
        }
    }

    #[test]
    fn fills_to_capacity_then_evicts() {
        let mut sampler = ReservoirSampler::new(32, 0.01, 1.0, 99).unwrap();
        fill(&mut sampler, 0, 32);
        assert!(sampler.is_full());
        let before = sampler.size();
        fill(&mut sampler, 32, 1000);
        assert_eq!(sampler.size(), before);
    }

    #[test]
    fn heap_keeps_the_maximum_on_top() {
        let mut sampler = ReservoirSampler::new(16, 0.0, 1.0, 7).unwrap();
        fill(&mut sampler, 0, 16);
        let samples = sampler.samples();
        let max = samples
            .iter()
            .map(|s| s.weight)
            .fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(sampler.weights[0], max);
    }

    #[test]
    fn recency_bias_retains_recent_points() {
        let mut sampler = ReservoirSampler::new(64, 0.05, 1.0, 3).unwrap();
        fill(&mut sampler, 0, 4000);
        let samples = sampler.samples();
        let recent = samples.iter().filter(|s| s.sequence_index >= 3800).count();
        // expected lifetime is about 1/lambda = 20 updates, so nearly all
        // retained samples come from the recent past
        assert!(recent > samples.len() / 2);
    }

    #[test]
    fn add_point_requires_a_staged_acceptance() {
        let mut sampler = ReservoirSampler::new(4, 0.0, 1.0, 1).unwrap();
        assert!(sampler.add_point(0).is_err());
    }

    #[test]
    fn decay_change_preserves_eviction_order() {
        let mut a = ReservoirSampler::new(8, 0.01, 1.0, 5).unwrap();
        let mut b = ReservoirSampler::new(8, 0.01, 1.0, 5).unwrap();
        fill(&mut a, 0, 8);
        fill(&mut b, 0, 8);
        // same seed, same decisions; changing decay on one must not
        // reorder the heap relative to its own weights
        b.set_time_decay(0.05).unwrap();
        let a_order: Vec<usize> = (0..8).map(|_| a.evict_max().point_index).collect();
        let reconciled = b.samples();
        assert_eq!(reconciled.len(), 8);
        let b_order: Vec<usize> = (0..8).map(|_| b.evict_max().point_index).collect();
        assert_eq!(a_order, b_order);
    }

    #[test]
    fn zero_decay_is_uniform_sampling() {
        let mut sampler = ReservoirSampler::new(128, 0.0, 1.0, 11).unwrap();
        fill(&mut sampler, 0, 10000);
        let samples = sampler.samples();
        let old = samples.iter().filter(|s| s.sequence_index < 5000).count();
        // no time bias: roughly half the sample predates the midpoint
        assert!(old > samples.len() / 5 && old < 4 * samples.len() / 5);
    }
}
