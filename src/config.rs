use crate::util::check_argument;
use crate::errors::Result;

/// Per-dimension preprocessing applied to each input tuple before it
/// enters tree space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransformMethod {
    None,
    /// z-score against discounted mean and deviation
    Normalize,
    /// first difference against the previous tuple
    Difference,
    /// first difference, then scaled by the discounted deviation
    NormalizeDifference,
}

/// Policy for filling missing values, both for explicitly flagged
/// coordinates and for tuples synthesized across timestamp gaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImputationMethod {
    /// user supplied fill values, one per input dimension
    Fixed,
    /// last observed value in each dimension
    Previous,
    /// next observed value (the tuple that closed the gap)
    Next,
    Linear,
    /// ask the forest itself, once it is ready to answer
    Rcf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ForestMode {
    Standard,
    /// append a normalized time-gap dimension to every shingle block
    TimeAugmented,
    /// fill in timestamp gaps with imputed tuples before admitting input
    StreamingImpute,
}

/// Width of the elements held by the point store. Inputs and outputs are
/// `f32` slices in both modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Precision {
    Single,
    Double,
}

pub const DEFAULT_NUMBER_OF_TREES: usize = 50;
pub const DEFAULT_SAMPLE_SIZE: usize = 256;
pub const DEFAULT_INITIAL_ACCEPT_FRACTION: f64 = 0.125;
pub const DEFAULT_BOUNDING_BOX_CACHE_FRACTION: f64 = 1.0;
pub const DEFAULT_USE_IMPUTED_FRACTION: f32 = 0.5;
pub const DEFAULT_TRANSFORM_DECAY: f64 = 0.01;
pub const DEFAULT_START_NORMALIZATION: usize = 10;
pub const DEFAULT_CLIP_FACTOR: f32 = 100.0;

/// Complete forest configuration. `dimensions` is the tree-space
/// dimension before time augmentation and must be a multiple of
/// `shingle_size`.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForestConfig {
    pub dimensions: usize,
    pub shingle_size: usize,
    pub number_of_trees: usize,
    pub sample_size: usize,
    pub output_after: usize,
    pub time_decay: f64,
    pub random_seed: u64,
    pub store_sequence_indexes: bool,
    pub center_of_mass_enabled: bool,
    pub parallel_execution: bool,
    /// worker count for a dedicated pool; 0 uses the global pool
    pub thread_pool_size: usize,
    pub bounding_box_cache_fraction: f64,
    pub internal_shingling: bool,
    pub precision: Precision,
    pub forest_mode: ForestMode,
    pub transform_method: TransformMethod,
    pub imputation_method: ImputationMethod,
    pub use_imputed_fraction: f32,
    pub initial_accept_fraction: f64,
    pub transform_decay: f64,
    /// per-input-dimension multipliers applied after the transform
    pub weights: Vec<f32>,
    /// fill values for `ImputationMethod::Fixed`
    pub default_fill: Vec<f32>,
    pub start_normalization: usize,
    pub clip_factor: f32,
    pub fast_forward: bool,
}

impl ForestConfig {
    pub fn new(dimensions: usize, shingle_size: usize) -> Self {
        let input_dimensions = if shingle_size > 0 && dimensions % shingle_size == 0 {
            dimensions / shingle_size
        } else {
            dimensions
        };
        ForestConfig {
            dimensions,
            shingle_size,
            number_of_trees: DEFAULT_NUMBER_OF_TREES,
            sample_size: DEFAULT_SAMPLE_SIZE,
            output_after: 1.max(DEFAULT_SAMPLE_SIZE / 4),
            time_decay: 0.1 / DEFAULT_SAMPLE_SIZE as f64,
            random_seed: 42,
            store_sequence_indexes: false,
            center_of_mass_enabled: false,
            parallel_execution: false,
            thread_pool_size: 0,
            bounding_box_cache_fraction: DEFAULT_BOUNDING_BOX_CACHE_FRACTION,
            internal_shingling: shingle_size > 1,
            precision: Precision::Single,
            forest_mode: ForestMode::Standard,
            transform_method: TransformMethod::None,
            imputation_method: ImputationMethod::Linear,
            use_imputed_fraction: DEFAULT_USE_IMPUTED_FRACTION,
            initial_accept_fraction: DEFAULT_INITIAL_ACCEPT_FRACTION,
            transform_decay: DEFAULT_TRANSFORM_DECAY,
            weights: vec![1.0; input_dimensions],
            default_fill: vec![0.0; input_dimensions],
            start_normalization: DEFAULT_START_NORMALIZATION,
            clip_factor: DEFAULT_CLIP_FACTOR,
            fast_forward: true,
        }
    }

    pub fn input_dimensions(&self) -> usize {
        self.dimensions / self.shingle_size
    }

    /// Tree-space dimension, including the time dimension appended per
    /// shingle block in time-augmented mode.
    pub fn tree_dimensions(&self) -> usize {
        if self.forest_mode == ForestMode::TimeAugmented {
            self.dimensions + self.shingle_size
        } else {
            self.dimensions
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_argument(self.dimensions > 0, "dimensions must be positive")?;
        check_argument(self.shingle_size > 0, "shingle size must be positive")?;
        check_argument(
            self.dimensions % self.shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_argument(self.number_of_trees > 0, "number of trees must be positive")?;
        check_argument(self.sample_size > 1, "sample size must exceed 1")?;
        check_argument(
            self.output_after >= 1 && self.output_after <= self.sample_size,
            "output_after must lie in [1, sample_size]",
        )?;
        check_argument(self.time_decay >= 0.0, "time decay cannot be negative")?;
        check_argument(
            (0.0..=1.0).contains(&self.bounding_box_cache_fraction),
            "bounding box cache fraction must lie in [0, 1]",
        )?;
        check_argument(
            self.initial_accept_fraction > 0.0 && self.initial_accept_fraction <= 1.0,
            "initial accept fraction must lie in (0, 1]",
        )?;
        check_argument(
            (0.0..=1.0).contains(&self.use_imputed_fraction),
            "use_imputed_fraction must lie in [0, 1]",
        )?;
        check_argument(
            self.transform_decay >= 0.0 && self.transform_decay < 1.0,
            "transform decay must lie in [0, 1)",
        )?;
        check_argument(
            self.weights.len() == self.input_dimensions(),
            "one weight per input dimension",
        )?;
        check_argument(
            self.default_fill.len() == self.input_dimensions(),
            "one fill value per input dimension",
        )?;
        check_argument(
            self.start_normalization < 2000,
            "start_normalization would buffer too much input",
        )?;
        if !self.internal_shingling && self.shingle_size > 1 {
            check_argument(
                self.transform_method == TransformMethod::None,
                "externally shingled input cannot be transformed",
            )?;
            check_argument(
                self.forest_mode == ForestMode::Standard,
                "externally shingled input requires standard mode",
            )?;
        }
        if self.forest_mode == ForestMode::StreamingImpute {
            check_argument(
                self.shingle_size > 1,
                "streaming impute requires shingle size > 1",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ForestConfig::new(8, 4).validate().unwrap();
        ForestConfig::new(3, 1).validate().unwrap();
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(ForestConfig::new(0, 1).validate().is_err());
        assert!(ForestConfig::new(7, 4).validate().is_err());
        let mut config = ForestConfig::new(8, 4);
        config.time_decay = -1.0;
        assert!(config.validate().is_err());
        let mut config = ForestConfig::new(8, 4);
        config.internal_shingling = false;
        config.transform_method = TransformMethod::Normalize;
        assert!(config.validate().is_err());
    }

    #[test]
    fn time_augmentation_widens_tree_space() {
        let mut config = ForestConfig::new(8, 4);
        config.forest_mode = ForestMode::TimeAugmented;
        assert_eq!(config.tree_dimensions(), 12);
        assert_eq!(config.input_dimensions(), 2);
    }
}
