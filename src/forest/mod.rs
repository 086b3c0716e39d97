pub mod accumulator;
pub mod core;
pub mod sampled_tree;

pub use self::accumulator::{ConvergingAccumulator, DiVectorAccumulator, OneSidedAccumulator};
pub use self::core::{ConditionalField, RcfCore, RcfCoreState};
pub use self::sampled_tree::{SampledTree, SampledTreeState};

use crate::common::divector::DiVector;
use crate::common::interpolation::DensityOutput;
use crate::common::rangevector::RangeVector;
use crate::config::{ForestConfig, ForestMode, ImputationMethod, Precision, TransformMethod};
use crate::preprocess::{Preprocessor, PreprocessorState};
use crate::util::{check_argument, sanitize};
use crate::visitor::Neighbor;
use crate::errors::Result;

const DEFAULT_APPROXIMATE_PRECISION: f64 = 0.1;

/// The forest facade: preprocessing on the way in, inverse maps on the
/// way out, deterministic empty answers before `output_after` updates.
///
/// ```
/// use cutforest::RandomCutForest;
///
/// let mut forest = RandomCutForest::builder(2, 1)
///     .number_of_trees(30)
///     .sample_size(128)
///     .random_seed(7)
///     .build()
///     .unwrap();
/// for i in 0..300 {
///     let x = (i % 10) as f32;
///     forest.update(&[x, -x], i).unwrap();
/// }
/// let ordinary = forest.anomaly_score(&[5.0, -5.0]).unwrap();
/// let outlier = forest.anomaly_score(&[40.0, 40.0]).unwrap();
/// assert!(outlier > ordinary);
/// ```
pub struct RandomCutForest {
    config: ForestConfig,
    core: RcfCore,
    preprocessor: Option<Preprocessor>,
}

impl RandomCutForest {
    pub fn builder(dimensions: usize, shingle_size: usize) -> RandomCutForestBuilder {
        RandomCutForestBuilder::new(dimensions, shingle_size)
    }

    pub fn from_config(config: ForestConfig) -> Result<Self> {
        config.validate()?;
        let core = RcfCore::new(&config)?;
        let preprocessor = if Self::uses_preprocessor(&config) {
            Some(Preprocessor::new(&config)?)
        } else {
            None
        };
        Ok(RandomCutForest {
            config,
            core,
            preprocessor,
        })
    }

    // externally shingled multi-block input bypasses the preprocessor;
    // everything else flows through it
    fn uses_preprocessor(config: &ForestConfig) -> bool {
        config.internal_shingling || config.shingle_size == 1
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn core(&self) -> &RcfCore {
        &self.core
    }

    pub fn preprocessor(&self) -> Option<&Preprocessor> {
        self.preprocessor.as_ref()
    }

    pub fn entries_seen(&self) -> u64 {
        self.core.entries_seen()
    }

    /// Tree-space dimension of the forest.
    pub fn dimensions(&self) -> usize {
        self.core.dimensions()
    }

    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
            && self
                .preprocessor
                .as_ref()
                .map(|p| p.is_ready())
                .unwrap_or(true)
    }

    pub fn data_quality(&self) -> f64 {
        self.preprocessor
            .as_ref()
            .map(|p| p.data_quality())
            .unwrap_or(1.0)
    }

    /// Admits one observation. With internal shingling the input is one
    /// tuple of `dimensions / shingle_size` values; otherwise it is a
    /// full tree-space point. Not reentrant; updates must be serialized
    /// by the caller.
    pub fn update(&mut self, input: &[f32], timestamp: u64) -> Result<()> {
        let clean = sanitize(input)?;
        match self.preprocessor.as_mut() {
            Some(preprocessor) => {
                let points = preprocessor.prepare_update(&clean, &[], timestamp, &self.core)?;
                for point in points {
                    self.core.update(&point)?;
                }
            }
            None => self.core.update(&clean)?,
        }
        Ok(())
    }

    /// As `update`, with explicitly flagged missing coordinates filled by
    /// the configured imputation method. Values at flagged positions are
    /// ignored.
    pub fn update_with_missing(
        &mut self,
        input: &[f32],
        timestamp: u64,
        missing: &[usize],
    ) -> Result<()> {
        let mut patched = Vec::from(input);
        for &index in missing {
            check_argument(index < patched.len(), "missing index out of range")?;
            patched[index] = 0.0;
        }
        let clean = sanitize(&patched)?;
        match self.preprocessor.as_mut() {
            Some(preprocessor) => {
                let points = preprocessor.prepare_update(&clean, missing, timestamp, &self.core)?;
                for point in points {
                    self.core.update(&point)?;
                }
                Ok(())
            }
            None => Err(crate::errors::RcfError::InvalidArgument {
                msg: "explicit missing values require the preprocessing pipeline",
            }),
        }
    }

    /// Mean anomaly score of the query; zero before the forest is ready.
    pub fn anomaly_score(&self, input: &[f32]) -> Result<f64> {
        let clean = sanitize(input)?;
        if !self.is_ready() {
            return Ok(0.0);
        }
        let query = self.query_point(&clean)?;
        self.core.score(&query)
    }

    /// Anomaly score with early stopping across trees.
    pub fn approximate_anomaly_score(&self, input: &[f32]) -> Result<f64> {
        let clean = sanitize(input)?;
        if !self.is_ready() {
            return Ok(0.0);
        }
        let query = self.query_point(&clean)?;
        let min_values = self.config.number_of_trees.min(5);
        let (score, _used) =
            self.core
                .approximate_score(&query, DEFAULT_APPROXIMATE_PRECISION, min_values)?;
        Ok(score)
    }

    /// Directional attribution of the anomaly score; its high+low total
    /// matches `anomaly_score` up to floating summation.
    pub fn anomaly_attribution(&self, input: &[f32]) -> Result<DiVector> {
        let clean = sanitize(input)?;
        if !self.is_ready() {
            return Ok(DiVector::empty(self.core.dimensions()));
        }
        let query = self.query_point(&clean)?;
        self.core.attribution(&query)
    }

    /// Fills the listed coordinates of the input, conditioning on the
    /// rest; before readiness the input is returned unchanged (missing
    /// coordinates zeroed).
    pub fn impute_missing_values(
        &self,
        input: &[f32],
        number_missing: usize,
        indices: &[usize],
    ) -> Result<Vec<f32>> {
        check_argument(number_missing > 0, "nothing to impute")?;
        check_argument(indices.len() >= number_missing, "too few missing indices")?;
        let missing = &indices[..number_missing];
        let mut patched = Vec::from(input);
        for &index in missing {
            check_argument(index < patched.len(), "missing index out of range")?;
            patched[index] = 0.0;
        }
        let clean = sanitize(&patched)?;
        if !self.is_ready() {
            return Ok(clean);
        }
        match self.preprocessor.as_ref() {
            Some(preprocessor) => {
                let query = preprocessor.query_point(&clean)?;
                let tree_missing = preprocessor.missing_indices_in_tree_space(missing)?;
                let completed = self.core.impute(&query, &tree_missing)?;
                let inverted = preprocessor.invert_block(&completed);
                let mut answer = clean;
                for &index in missing {
                    answer[index] = inverted[index];
                }
                Ok(answer)
            }
            None => self.core.impute(&clean, missing),
        }
    }

    /// Forecasts the next `horizon` tuples from the current shingle and
    /// maps them back to input space, with per-coordinate bounds.
    pub fn extrapolate(&self, horizon: usize) -> Result<RangeVector> {
        check_argument(horizon > 0, "horizon must be positive")?;
        check_argument(
            self.config.shingle_size > 1,
            "extrapolation needs shingle size > 1",
        )?;
        let preprocessor = self.preprocessor.as_ref().ok_or(
            crate::errors::RcfError::InvalidArgument {
                msg: "extrapolation requires the preprocessing pipeline",
            },
        )?;
        if !self.is_ready() {
            return Ok(RangeVector::new(horizon * preprocessor.input_dimensions()));
        }
        let shingle = preprocessor.last_shingled_point().to_vec();
        let forecast = self.core.extrapolate_basic(
            &shingle,
            horizon,
            preprocessor.block_width(),
            false,
            0,
        )?;
        preprocessor.invert_forecast(forecast)
    }

    /// Sampled points within `distance_threshold` (Euclidean, in tree
    /// space), grouped across trees with merged sequence sets.
    pub fn near_neighbors(
        &self,
        input: &[f32],
        distance_threshold: f64,
    ) -> Result<Vec<Neighbor>> {
        let clean = sanitize(input)?;
        if !self.is_ready() {
            return Ok(Vec::new());
        }
        let query = self.query_point(&clean)?;
        self.core.near_neighbors(&query, distance_threshold)
    }

    /// Density estimate at the query point.
    pub fn simple_density(&self, input: &[f32]) -> Result<DensityOutput> {
        let clean = sanitize(input)?;
        if !self.is_ready() {
            return Ok(DensityOutput {
                density: 0.0,
                directional: DiVector::empty(self.core.dimensions()),
            });
        }
        let query = self.query_point(&clean)?;
        let measure = self.core.density(&query)?;
        Ok(DensityOutput::from_measure(&measure))
    }

    /// Changes the reservoir decay mid-stream for every tree.
    pub fn set_time_decay(&mut self, time_decay: f64) -> Result<()> {
        self.core.set_time_decay(time_decay)
    }

    fn query_point(&self, clean: &[f32]) -> Result<Vec<f32>> {
        match self.preprocessor.as_ref() {
            Some(preprocessor) => preprocessor.query_point(clean),
            None => {
                check_argument(
                    clean.len() == self.core.dimensions(),
                    "incorrect point length",
                )?;
                Ok(Vec::from(clean))
            }
        }
    }
}

/// Opaque captured state of a forest; `RandomCutForest::from_state`
/// round-trips it such that subsequent scores match exactly.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForestState {
    pub config: ForestConfig,
    pub core: RcfCoreState,
    pub preprocessor: Option<PreprocessorState>,
}

impl RandomCutForest {
    pub fn to_state(&self) -> ForestState {
        ForestState {
            config: self.config.clone(),
            core: self.core.to_state(),
            preprocessor: self.preprocessor.as_ref().map(|p| p.to_state()),
        }
    }

    pub fn from_state(state: ForestState) -> Result<Self> {
        state.config.validate()?;
        let core = RcfCore::from_state(state.core)?;
        let preprocessor = match state.preprocessor {
            Some(preprocessor_state) => Some(Preprocessor::from_state(
                &state.config,
                preprocessor_state,
            )?),
            None => None,
        };
        Ok(RandomCutForest {
            config: state.config,
            core,
            preprocessor,
        })
    }
}

/// Builder over `ForestConfig`; `dimensions` is the tree-space dimension
/// and must be a multiple of `shingle_size`. Unless set explicitly, the
/// decay defaults to 1/(10 * sample_size) and `output_after` to a
/// quarter of the sample.
pub struct RandomCutForestBuilder {
    config: ForestConfig,
    time_decay_set: bool,
    output_after_set: bool,
}

impl RandomCutForestBuilder {
    pub fn new(dimensions: usize, shingle_size: usize) -> Self {
        RandomCutForestBuilder {
            config: ForestConfig::new(dimensions, shingle_size),
            time_decay_set: false,
            output_after_set: false,
        }
    }

    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.config.number_of_trees = number_of_trees;
        self
    }

    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.config.sample_size = sample_size;
        if !self.time_decay_set {
            self.config.time_decay = 0.1 / sample_size as f64;
        }
        if !self.output_after_set {
            self.config.output_after = 1.max(sample_size / 4);
        }
        self
    }

    pub fn output_after(mut self, output_after: usize) -> Self {
        self.config.output_after = output_after;
        self.output_after_set = true;
        self
    }

    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.config.time_decay = time_decay;
        self.time_decay_set = true;
        self
    }

    pub fn random_seed(mut self, random_seed: u64) -> Self {
        self.config.random_seed = random_seed;
        self
    }

    pub fn store_sequence_indexes(mut self, enabled: bool) -> Self {
        self.config.store_sequence_indexes = enabled;
        self
    }

    pub fn center_of_mass(mut self, enabled: bool) -> Self {
        self.config.center_of_mass_enabled = enabled;
        self
    }

    pub fn parallel_execution(mut self, enabled: bool) -> Self {
        self.config.parallel_execution = enabled;
        self
    }

    pub fn thread_pool_size(mut self, threads: usize) -> Self {
        self.config.thread_pool_size = threads;
        self
    }

    pub fn bounding_box_cache_fraction(mut self, fraction: f64) -> Self {
        self.config.bounding_box_cache_fraction = fraction;
        self
    }

    pub fn internal_shingling(mut self, enabled: bool) -> Self {
        self.config.internal_shingling = enabled;
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.config.precision = precision;
        self
    }

    pub fn forest_mode(mut self, forest_mode: ForestMode) -> Self {
        self.config.forest_mode = forest_mode;
        self
    }

    pub fn transform_method(mut self, transform_method: TransformMethod) -> Self {
        self.config.transform_method = transform_method;
        self
    }

    pub fn imputation_method(mut self, imputation_method: ImputationMethod) -> Self {
        self.config.imputation_method = imputation_method;
        self
    }

    pub fn use_imputed_fraction(mut self, fraction: f32) -> Self {
        self.config.use_imputed_fraction = fraction;
        self
    }

    pub fn initial_accept_fraction(mut self, fraction: f64) -> Self {
        self.config.initial_accept_fraction = fraction;
        self
    }

    pub fn transform_decay(mut self, transform_decay: f64) -> Self {
        self.config.transform_decay = transform_decay;
        self
    }

    pub fn weights(mut self, weights: &[f32]) -> Self {
        self.config.weights = Vec::from(weights);
        self
    }

    pub fn default_fill(mut self, default_fill: &[f32]) -> Self {
        self.config.default_fill = Vec::from(default_fill);
        self
    }

    pub fn start_normalization(mut self, start_normalization: usize) -> Self {
        self.config.start_normalization = start_normalization;
        self
    }

    pub fn fast_forward(mut self, enabled: bool) -> Self {
        self.config.fast_forward = enabled;
        self
    }

    pub fn build(self) -> Result<RandomCutForest> {
        RandomCutForest::from_config(self.config)
    }
}
