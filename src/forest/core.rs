use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use rayon::prelude::*;

use crate::common::divector::DiVector;
use crate::common::interpolation::InterpolationMeasure;
use crate::common::rangevector::RangeVector;
use crate::config::ForestConfig;
use crate::forest::accumulator::{ConvergingAccumulator, OneSidedAccumulator};
use crate::forest::sampled_tree::{SampledTree, SampledTreeState};
use crate::store::points::{PointStore, PointStoreState};
use crate::util::{check_argument, l1_distance};
use crate::visitor::{
    AnomalyScoreVisitor, AttributionVisitor, DensityVisitor, ImputeVisitor, ImputedPoint,
    NearNeighborVisitor, Neighbor, Visitor, VisitorSettings,
};
use crate::errors::{RcfError, Result};

/// A completed conditional query: the chosen completion and per-
/// coordinate bounds over the per-tree candidates.
#[derive(Clone, Debug)]
pub struct ConditionalField {
    pub median: Vec<f32>,
    pub lower: Vec<f32>,
    pub upper: Vec<f32>,
}

const LOWER_FRACTION: usize = 10;
const UPPER_FRACTION: usize = 90;

/// The forest executor: N sampler+tree pairs over one shared point
/// store. Mutation is single-producer; queries fan out over the trees
/// (optionally in parallel) and reduce.
pub struct RcfCore {
    pub(crate) dimensions: usize,
    pub(crate) sample_size: usize,
    pub(crate) output_after: usize,
    pub(crate) parallel: bool,
    pub(crate) thread_pool_size: usize,
    pool: Option<rayon::ThreadPool>,
    pub(crate) entries_seen: u64,
    pub(crate) store: PointStore,
    pub(crate) trees: Vec<SampledTree>,
}

impl RcfCore {
    pub fn new(config: &ForestConfig) -> Result<Self> {
        config.validate()?;
        let dimensions = config.tree_dimensions();
        let mut store_capacity = config.sample_size * config.number_of_trees + 1;
        if store_capacity < 2 * config.sample_size {
            store_capacity = 2 * config.sample_size;
        }
        let store = PointStore::new(
            dimensions,
            config.shingle_size,
            store_capacity,
            2 * config.sample_size,
            config.internal_shingling,
            false,
            config.precision,
        )?;
        let mut rng = ChaCha20Rng::seed_from_u64(config.random_seed);
        let mut trees = Vec::with_capacity(config.number_of_trees);
        for _ in 0..config.number_of_trees {
            trees.push(SampledTree::new(
                dimensions,
                config.sample_size,
                config.time_decay,
                config.initial_accept_fraction,
                config.bounding_box_cache_fraction,
                config.store_sequence_indexes,
                config.center_of_mass_enabled,
                rng.next_u64(),
                rng.next_u64(),
            )?);
        }
        let pool = Self::build_pool(config.parallel_execution, config.thread_pool_size)?;
        Ok(RcfCore {
            dimensions,
            sample_size: config.sample_size,
            output_after: config.output_after,
            parallel: config.parallel_execution,
            thread_pool_size: config.thread_pool_size,
            pool,
            entries_seen: 0,
            store,
            trees,
        })
    }

    fn build_pool(parallel: bool, threads: usize) -> Result<Option<rayon::ThreadPool>> {
        if parallel && threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|_| RcfError::InvalidArgument {
                    msg: "could not build the worker pool",
                })?;
            Ok(Some(pool))
        } else {
            Ok(None)
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn entries_seen(&self) -> u64 {
        self.entries_seen
    }

    pub fn is_ready(&self) -> bool {
        self.entries_seen >= self.output_after as u64
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn trees(&self) -> &[SampledTree] {
        &self.trees
    }

    pub fn total_tree_mass(&self) -> usize {
        self.trees.iter().map(|t| t.tree().mass()).sum()
    }

    /// Admits one tree-space point. The sequence index is fixed before
    /// the fan-out; reference-count deltas are applied in one batch after
    /// every tree finished, so the store sees a consistent count whatever
    /// the cross-tree execution order was.
    pub fn update(&mut self, point: &[f32]) -> Result<()> {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        let sequence = self.entries_seen;
        let handle = self.store.add(point)?;
        let results: Vec<(usize, usize)> = {
            let store = &self.store;
            let trees = &mut self.trees;
            if self.parallel {
                let mut task = move || {
                    trees
                        .par_iter_mut()
                        .map(|tree| tree.update(handle, sequence, store))
                        .collect::<Result<Vec<_>>>()
                };
                match &self.pool {
                    Some(pool) => pool.install(task),
                    None => task(),
                }?
            } else {
                let mut out = Vec::with_capacity(trees.len());
                for tree in trees.iter_mut() {
                    out.push(tree.update(handle, sequence, store)?);
                }
                out
            }
        };
        self.store.adjust(&results)?;
        self.store.decrement(handle)?;
        self.entries_seen += 1;
        Ok(())
    }

    /// Changes the reservoir decay of every tree mid-stream.
    pub fn set_time_decay(&mut self, time_decay: f64) -> Result<()> {
        for tree in self.trees.iter_mut() {
            tree.sampler.set_time_decay(time_decay)?;
        }
        Ok(())
    }

    /// Fans a visitor out over every tree and folds the per-tree results.
    /// Empty trees contribute `default`.
    pub fn traverse_forest<V, R, S>(
        &self,
        point: &[f32],
        factory: impl Fn(usize) -> V + Sync,
        default: R,
        initial: S,
        mut collect: impl FnMut(R, &mut S),
        finish: impl FnOnce(&mut S, usize),
    ) -> Result<S>
    where
        V: Visitor<Output = R>,
        R: Clone + Send + Sync,
    {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        let results = self.evaluate_trees(&self.trees, point, &factory, &default)?;
        let count = results.len();
        let mut answer = initial;
        for result in results {
            collect(result, &mut answer);
        }
        finish(&mut answer, count);
        Ok(answer)
    }

    /// As `traverse_forest`, feeding results into a converging
    /// accumulator in batches and stopping early once it converges.
    /// Returns the number of trees evaluated.
    pub fn traverse_converging<V, R>(
        &self,
        point: &[f32],
        factory: impl Fn(usize) -> V + Sync,
        default: R,
        accumulator: &mut impl ConvergingAccumulator<R>,
    ) -> Result<usize>
    where
        V: Visitor<Output = R>,
        R: Clone + Send + Sync,
    {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        let batch = if self.parallel {
            let threads = self
                .pool
                .as_ref()
                .map(|p| p.current_num_threads())
                .unwrap_or_else(rayon::current_num_threads);
            threads.max(1)
        } else {
            1
        };
        for chunk in self.trees.chunks(batch) {
            let results = self.evaluate_trees(chunk, point, &factory, &default)?;
            for result in results {
                accumulator.accept(result);
            }
            if accumulator.converged() {
                break;
            }
        }
        Ok(accumulator.accepted())
    }

    fn evaluate_trees<V, R>(
        &self,
        trees: &[SampledTree],
        point: &[f32],
        factory: &(impl Fn(usize) -> V + Sync),
        default: &R,
    ) -> Result<Vec<R>>
    where
        V: Visitor<Output = R>,
        R: Clone + Send + Sync,
    {
        let store = &self.store;
        let evaluate = |tree: &SampledTree| -> Result<R> {
            let mut visitor = factory(tree.tree().mass());
            if tree.traverse(point, store, &mut visitor)? {
                visitor.result()
            } else {
                Ok(default.clone())
            }
        };
        if self.parallel {
            let task = || trees.par_iter().map(evaluate).collect::<Result<Vec<R>>>();
            match &self.pool {
                Some(pool) => pool.install(task),
                None => task(),
            }
        } else {
            trees.iter().map(evaluate).collect()
        }
    }

    /// Mean anomaly score over the full forest.
    pub fn score(&self, point: &[f32]) -> Result<f64> {
        self.traverse_forest(
            point,
            |tree_mass| AnomalyScoreVisitor::new(tree_mass, VisitorSettings::default()),
            0.0f64,
            0.0f64,
            |value, total| *total += value,
            |total, count| {
                if count > 0 {
                    *total /= count as f64;
                }
            },
        )
    }

    /// Anomaly score with early stopping; returns the score and the
    /// number of trees consulted. `precision` sets the witness target of
    /// the one-sided convergence test.
    pub fn approximate_score(
        &self,
        point: &[f32],
        precision: f64,
        min_values_accepted: usize,
    ) -> Result<(f64, usize)> {
        let mut accumulator = OneSidedAccumulator::new(precision, min_values_accepted)?;
        let used = self.traverse_converging(
            point,
            |tree_mass| AnomalyScoreVisitor::new(tree_mass, VisitorSettings::default()),
            0.0f64,
            &mut accumulator,
        )?;
        Ok((accumulator.mean(), used))
    }

    /// Mean attribution over the full forest; the high+low total matches
    /// the mean anomaly score.
    pub fn attribution(&self, point: &[f32]) -> Result<DiVector> {
        let dimensions = self.dimensions;
        self.traverse_forest(
            point,
            |tree_mass| {
                AttributionVisitor::new(tree_mass, dimensions, VisitorSettings::default())
            },
            DiVector::empty(dimensions),
            DiVector::empty(dimensions),
            |value, total: &mut DiVector| value.add_to(total),
            |total, count| {
                if count > 0 {
                    total.divide(count);
                }
            },
        )
    }

    /// Summed interpolation measure over the forest.
    pub fn density(&self, point: &[f32]) -> Result<InterpolationMeasure> {
        let dimensions = self.dimensions;
        self.traverse_forest(
            point,
            |tree_mass| DensityVisitor::new(tree_mass, dimensions, VisitorSettings::default()),
            InterpolationMeasure::empty(dimensions, 0.0),
            InterpolationMeasure::empty(dimensions, 0.0),
            |value, total: &mut InterpolationMeasure| value.add_to(total),
            |total, count| {
                if count > 0 {
                    total.divide(count);
                }
            },
        )
    }

    /// Near neighbors within `threshold`, grouped across trees by exact
    /// point equality with merged sequence sets, closest first.
    pub fn near_neighbors(&self, point: &[f32], threshold: f64) -> Result<Vec<Neighbor>> {
        let found: Vec<Option<Neighbor>> = self.traverse_forest(
            point,
            |_tree_mass| NearNeighborVisitor::new(threshold),
            None,
            Vec::new(),
            |value, list: &mut Vec<Option<Neighbor>>| list.push(value),
            |_list, _count| {},
        )?;
        let mut merged: Vec<Neighbor> = Vec::new();
        for neighbor in found.into_iter().flatten() {
            match merged.iter_mut().find(|n| n.point == neighbor.point) {
                Some(existing) => {
                    existing.trees += 1;
                    existing
                        .sequence_indexes
                        .extend_from_slice(&neighbor.sequence_indexes);
                }
                None => merged.push(neighbor),
            }
        }
        for neighbor in merged.iter_mut() {
            neighbor.sequence_indexes.sort_unstable();
            neighbor.sequence_indexes.dedup();
        }
        merged.sort_by(|a, b| a.distance.partial_cmp(&b.distance).expect("finite distances"));
        Ok(merged)
    }

    /// Per-tree completions of a partial point, ranked by their
    /// centrality-adjusted anomaly score.
    pub fn impute_candidates(
        &self,
        point: &[f32],
        missing: &[usize],
        centrality: f64,
    ) -> Result<Vec<ImputedPoint>> {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        check_argument(!missing.is_empty(), "nothing to impute")?;
        for &index in missing {
            check_argument(index < self.dimensions, "missing index out of range")?;
        }
        let mut mask = vec![false; self.dimensions];
        for &index in missing {
            mask[index] = true;
        }
        let store = &self.store;
        let mask = &mask;
        let settings = VisitorSettings::with_distance(l1_distance);
        let evaluate = |tree: &SampledTree| -> Result<Option<ImputedPoint>> {
            let mut visitor = ImputeVisitor::new(
                missing,
                centrality,
                tree.tree().mass(),
                tree.query_seed(),
                settings,
            );
            if tree.traverse_multi(point, mask, store, &mut visitor)? {
                visitor.result().map(Some)
            } else {
                Ok(None)
            }
        };
        let results: Result<Vec<Option<ImputedPoint>>> = if self.parallel {
            let task = || {
                self.trees
                    .par_iter()
                    .map(evaluate)
                    .collect::<Result<Vec<_>>>()
            };
            match &self.pool {
                Some(pool) => pool.install(task),
                None => task(),
            }
        } else {
            self.trees.iter().map(evaluate).collect()
        };
        let mut candidates: Vec<ImputedPoint> = results?.into_iter().flatten().collect();
        candidates.sort_by(|a, b| a.score.partial_cmp(&b.score).expect("finite scores"));
        Ok(candidates)
    }

    /// The forest's completion of a partial point: the 50th percentile
    /// candidate by score for one missing coordinate, the 25th for more.
    pub fn impute(&self, point: &[f32], missing: &[usize]) -> Result<Vec<f32>> {
        Ok(self.conditional_field(point, missing)?.median)
    }

    pub fn conditional_field(&self, point: &[f32], missing: &[usize]) -> Result<ConditionalField> {
        let candidates = self.impute_candidates(point, missing, 1.0)?;
        if candidates.is_empty() {
            return Ok(ConditionalField {
                median: Vec::from(point),
                lower: Vec::from(point),
                upper: Vec::from(point),
            });
        }
        let percentile = if missing.len() == 1 { 50 } else { 25 };
        let chosen = &candidates[(candidates.len() * percentile / 100).min(candidates.len() - 1)];
        let mut lower = chosen.point.clone();
        let mut upper = chosen.point.clone();
        for &index in missing {
            let mut values: Vec<f32> = candidates.iter().map(|c| c.point[index]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).expect("finite values"));
            lower[index] = values[(values.len() * LOWER_FRACTION / 100).min(values.len() - 1)];
            upper[index] = values[(values.len() * UPPER_FRACTION / 100).min(values.len() - 1)];
        }
        Ok(ConditionalField {
            median: chosen.point.clone(),
            lower,
            upper,
        })
    }

    /// Iterated forecast in tree space: per step the shingle window
    /// slides (or rotates, when cyclic) and the vacated block is imputed
    /// conditionally on the rest.
    pub fn extrapolate_basic(
        &self,
        point: &[f32],
        horizon: usize,
        block_size: usize,
        cyclic: bool,
        shingle_index: usize,
    ) -> Result<RangeVector> {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        check_argument(
            block_size > 0 && self.dimensions % block_size == 0,
            "block size must divide dimensions",
        )?;
        let shingles = self.dimensions / block_size;
        check_argument(shingles > 1, "extrapolation needs shingle size > 1")?;

        let mut working = Vec::from(point);
        let mut forecast = RangeVector::new(horizon * block_size);
        let mut missing: Vec<usize> = Vec::with_capacity(block_size);
        for step in 0..horizon {
            missing.clear();
            if cyclic {
                let block = (shingle_index + step) % shingles;
                missing.extend((0..block_size).map(|j| block * block_size + j));
            } else {
                working.copy_within(block_size.., 0);
                missing.extend((0..block_size).map(|j| self.dimensions - block_size + j));
            }
            for &index in &missing {
                working[index] = 0.0;
            }
            let field = self.conditional_field(&working, &missing)?;
            for (j, &index) in missing.iter().enumerate() {
                let at = step * block_size + j;
                forecast.values[at] = field.median[index];
                forecast.upper[at] = field.upper[index].max(field.median[index]);
                forecast.lower[at] = field.lower[index].min(field.median[index]);
                working[index] = field.median[index];
            }
        }
        Ok(forecast)
    }

    /// Cross-component accounting checks used by tests.
    pub fn validate(&self) -> Result<()> {
        for tree in &self.trees {
            tree.tree().validate(&self.store)?;
        }
        crate::util::check_state(
            self.store.active_references() == self.total_tree_mass(),
            "store references do not match tree masses",
        )?;
        Ok(())
    }
}

/// Plain captured state of the executor.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RcfCoreState {
    pub dimensions: usize,
    pub sample_size: usize,
    pub output_after: usize,
    pub parallel: bool,
    pub thread_pool_size: usize,
    pub entries_seen: u64,
    pub store: PointStoreState,
    pub trees: Vec<SampledTreeState>,
}

impl RcfCore {
    pub fn to_state(&self) -> RcfCoreState {
        RcfCoreState {
            dimensions: self.dimensions,
            sample_size: self.sample_size,
            output_after: self.output_after,
            parallel: self.parallel,
            thread_pool_size: self.thread_pool_size,
            entries_seen: self.entries_seen,
            store: self.store.to_state(),
            trees: self.trees.iter().map(|t| t.to_state()).collect(),
        }
    }

    pub fn from_state(state: RcfCoreState) -> Result<Self> {
        let pool = Self::build_pool(state.parallel, state.thread_pool_size)?;
        let trees = state
            .trees
            .into_iter()
            .map(SampledTree::from_state)
            .collect::<Result<Vec<_>>>()?;
        Ok(RcfCore {
            dimensions: state.dimensions,
            sample_size: state.sample_size,
            output_after: state.output_after,
            parallel: state.parallel,
            thread_pool_size: state.thread_pool_size,
            pool,
            entries_seen: state.entries_seen,
            store: PointStore::from_state(state.store)?,
            trees,
        })
    }
}
