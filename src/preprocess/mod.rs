pub mod transformer;

pub use transformer::Transformer;

use crate::common::deviation::Deviation;
use crate::common::rangevector::RangeVector;
use crate::config::{ForestConfig, ForestMode, ImputationMethod};
use crate::forest::core::RcfCore;
use crate::util::{check_argument, shift_into};
use crate::errors::Result;

// timestamp sketch banks: value, gap, smoothed value deviation,
// smoothed gap mean, smoothed gap deviation
const TIMESTAMP_BANKS: usize = 5;
const GAP_TRIGGER: f64 = 1.5;
const GAP_CAP_SHINGLES: usize = 3;

/// Maps raw input tuples to tree-space points and back.
///
/// The preprocessor owns the shingle: a ring of the last S input tuples,
/// their timestamps and per-tuple imputed flags. Each admitted tuple is
/// transformed, optionally augmented with a normalized time gap, and
/// shifted into the current shingled point; the forest is updated with
/// that point unless too much of the shingle is synthetic. Timestamp
/// gaps beyond 1.5x the discounted mean gap are filled with imputed
/// tuples first.
pub struct Preprocessor {
    pub(crate) input_dimensions: usize,
    pub(crate) shingle_size: usize,
    pub(crate) forest_mode: ForestMode,
    pub(crate) imputation_method: ImputationMethod,
    pub(crate) transformer: Transformer,
    pub(crate) timestamp_stats: Vec<Deviation>,
    pub(crate) data_quality: Deviation,
    pub(crate) last_inputs: Vec<f32>,
    pub(crate) last_timestamps: Vec<u64>,
    pub(crate) imputed_flags: Vec<bool>,
    pub(crate) last_shingled_point: Vec<f32>,
    pub(crate) values_seen: usize,
    pub(crate) internal_timestamp: usize,
    pub(crate) initial_values: Vec<Vec<f32>>,
    pub(crate) initial_timestamps: Vec<u64>,
    pub(crate) start_normalization: usize,
    pub(crate) use_imputed_fraction: f32,
    pub(crate) default_fill: Vec<f32>,
    pub(crate) fast_forward: bool,
    pub(crate) weight_time: f32,
}

impl Preprocessor {
    pub fn new(config: &ForestConfig) -> Result<Self> {
        let input_dimensions = config.input_dimensions();
        let shingle_size = config.shingle_size;
        let transformer = Transformer::new(
            config.transform_method,
            input_dimensions,
            config.transform_decay,
            &config.weights,
            config.clip_factor,
        )?;
        let mut timestamp_stats = Vec::with_capacity(TIMESTAMP_BANKS);
        timestamp_stats.push(Deviation::new(config.transform_decay)?);
        timestamp_stats.push(Deviation::new(config.transform_decay)?);
        for _ in 0..TIMESTAMP_BANKS - 2 {
            timestamp_stats.push(Deviation::new(0.1 * config.transform_decay)?);
        }
        Ok(Preprocessor {
            input_dimensions,
            shingle_size,
            forest_mode: config.forest_mode,
            imputation_method: config.imputation_method,
            transformer,
            timestamp_stats,
            data_quality: Deviation::new(config.transform_decay)?,
            last_inputs: vec![0.0; shingle_size * input_dimensions],
            last_timestamps: vec![0; shingle_size],
            imputed_flags: vec![false; shingle_size],
            last_shingled_point: vec![0.0; config.tree_dimensions()],
            values_seen: 0,
            internal_timestamp: 0,
            initial_values: Vec::new(),
            initial_timestamps: Vec::new(),
            start_normalization: config.start_normalization,
            use_imputed_fraction: config.use_imputed_fraction,
            default_fill: config.default_fill.clone(),
            fast_forward: config.fast_forward,
            weight_time: 1.0,
        })
    }

    pub fn input_dimensions(&self) -> usize {
        self.input_dimensions
    }

    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    /// Width of one shingle block in tree space.
    pub fn block_width(&self) -> usize {
        if self.forest_mode == ForestMode::TimeAugmented {
            self.input_dimensions + 1
        } else {
            self.input_dimensions
        }
    }

    /// True once a full shingle of tuples has been admitted.
    pub fn is_ready(&self) -> bool {
        self.internal_timestamp >= self.shingle_size
    }

    pub fn values_seen(&self) -> usize {
        self.values_seen
    }

    /// Discounted mean of (1 - imputed fraction of the shingle); one when
    /// nothing was ever imputed.
    pub fn data_quality(&self) -> f64 {
        if self.data_quality.is_empty() {
            1.0
        } else {
            self.data_quality.mean()
        }
    }

    /// Imputed tuples among the last S admitted.
    pub fn number_of_imputed(&self) -> usize {
        self.imputed_flags.iter().filter(|&&flag| flag).count()
    }

    pub fn last_shingled_point(&self) -> &[f32] {
        &self.last_shingled_point
    }

    /// Admits one observation and returns the tree-space points the
    /// forest should be updated with: possibly several when a timestamp
    /// gap was filled in, possibly none during warmup or when the update
    /// is shingle-only. Coordinates listed in `missing` are filled per
    /// the configured imputation method.
    pub fn prepare_update(
        &mut self,
        input: &[f32],
        missing: &[usize],
        timestamp: u64,
        forest: &RcfCore,
    ) -> Result<Vec<Vec<f32>>> {
        check_argument(
            input.len() == self.input_dimensions,
            "incorrect input length",
        )?;
        for &index in missing {
            check_argument(index < self.input_dimensions, "missing index out of range")?;
        }
        let mut out = Vec::new();
        if !self.past_initial() {
            let filled = self.fill_missing(input, missing, None)?;
            self.initial_values.push(filled);
            self.initial_timestamps.push(timestamp);
            self.values_seen += 1;
            if self.values_seen >= self.start_normalization {
                self.drain(&mut out);
            }
            return Ok(out);
        }
        if self.forest_mode == ForestMode::StreamingImpute && self.internal_timestamp > 0 {
            self.fill_gap(input, timestamp, forest, &mut out)?;
        }
        let filled = self.fill_missing(input, missing, Some(forest))?;
        self.admit(&filled, !missing.is_empty(), timestamp, true, &mut out);
        self.values_seen += 1;
        Ok(out)
    }

    /// Assembles the tree-space query for an input tuple: the tuple is
    /// transformed and shifted into a copy of the current shingle. A
    /// full-width tree-space point passes through unchanged (only
    /// distinguishable from a tuple when the shingle size exceeds one).
    pub fn query_point(&self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != self.input_dimensions {
            check_argument(
                input.len() == self.last_shingled_point.len(),
                "incorrect input length",
            )?;
            return Ok(Vec::from(input));
        }
        let previous = self.last_input_block().to_vec();
        let mut block = self.transformer.transform(input, &previous);
        if self.forest_mode == ForestMode::TimeAugmented {
            block.push(self.expected_gap_value());
        }
        let mut query = self.last_shingled_point.clone();
        shift_into(&mut query, &block);
        Ok(query)
    }

    /// Maps missing positions of the newest tuple into tree space.
    pub fn missing_indices_in_tree_space(&self, missing: &[usize]) -> Result<Vec<usize>> {
        let dimensions = self.last_shingled_point.len();
        let block = self.block_width();
        missing
            .iter()
            .map(|&index| {
                check_argument(index < self.input_dimensions, "missing index out of range")?;
                Ok(dimensions - block + index)
            })
            .collect()
    }

    /// Reconstructs the input-space tuple behind the newest block of a
    /// tree-space point.
    pub fn invert_block(&self, tree_point: &[f32]) -> Vec<f32> {
        let dimensions = self.last_shingled_point.len();
        let block = self.block_width();
        let start = dimensions - block;
        self.transformer.invert(
            &tree_point[start..start + self.input_dimensions],
            self.last_input_block(),
        )
    }

    /// Undoes transforms on a tree-space forecast, dropping the time
    /// dimensions in time-augmented mode.
    pub fn invert_forecast(&self, forecast: RangeVector) -> Result<RangeVector> {
        let block = self.block_width();
        let d = self.input_dimensions;
        check_argument(forecast.len() % block == 0, "forecast length mismatch")?;
        let horizon = forecast.len() / block;
        let mut values = RangeVector::new(horizon * d);
        for step in 0..horizon {
            for j in 0..d {
                values.values[step * d + j] = forecast.values[step * block + j];
                values.upper[step * d + j] = forecast.upper[step * block + j];
                values.lower[step * d + j] = forecast.lower[step * block + j];
            }
        }
        self.transformer
            .invert_forecast(&mut values, self.last_input_block())?;
        Ok(values)
    }

    fn requires_warmup(&self) -> bool {
        matches!(
            self.transformer.method,
            crate::config::TransformMethod::Normalize
                | crate::config::TransformMethod::NormalizeDifference
        )
    }

    fn past_initial(&self) -> bool {
        !self.requires_warmup() || self.values_seen >= self.start_normalization
    }

    fn last_input_block(&self) -> &[f32] {
        let d = self.input_dimensions;
        &self.last_inputs[self.last_inputs.len() - d..]
    }

    fn fill_missing(
        &self,
        input: &[f32],
        missing: &[usize],
        forest: Option<&RcfCore>,
    ) -> Result<Vec<f32>> {
        if missing.is_empty() {
            return Ok(Vec::from(input));
        }
        let previous = self.last_input_block();
        let mut filled = Vec::from(input);
        for &index in missing {
            filled[index] = match self.imputation_method {
                ImputationMethod::Fixed => self.default_fill[index],
                // only the previous value exists for the newest tuple
                _ => previous[index],
            };
        }
        if self.imputation_method == ImputationMethod::Rcf {
            if let Some(forest) = forest {
                if forest.is_ready() && self.is_ready() {
                    let query = self.query_point(&filled)?;
                    let tree_missing = self.missing_indices_in_tree_space(missing)?;
                    let completed = forest.impute(&query, &tree_missing)?;
                    let inverted = self.invert_block(&completed);
                    for &index in missing {
                        filled[index] = inverted[index];
                    }
                }
            }
        }
        Ok(filled)
    }

    fn fill_gap(
        &mut self,
        input: &[f32],
        timestamp: u64,
        forest: &RcfCore,
        out: &mut Vec<Vec<f32>>,
    ) -> Result<()> {
        let previous_ts = self.last_timestamps[self.shingle_size - 1];
        if timestamp <= previous_ts {
            return Ok(());
        }
        let average = self.timestamp_stats[1].mean();
        if average <= 0.0 {
            return Ok(());
        }
        let gap = (timestamp - previous_ts) as f64;
        if gap <= GAP_TRIGGER * average {
            return Ok(());
        }
        let steps = ((gap / average).floor() as usize).saturating_sub(1);
        if steps == 0 {
            return Ok(());
        }
        if steps > GAP_CAP_SHINGLES * self.shingle_size && self.fast_forward {
            // too long to interpolate; admit the typical value until the
            // shingle forgets the old regime
            let typical = self.transformer.shift();
            for k in 0..self.shingle_size - 1 {
                let ts = previous_ts + ((k + 1) as f64 * average) as u64;
                self.admit(&typical, true, ts, true, out);
            }
        } else {
            let steps = steps.min(GAP_CAP_SHINGLES * self.shingle_size);
            let previous_input = self.last_input_block().to_vec();
            for k in 1..=steps {
                let fraction = k as f64 / (steps + 1) as f64;
                let tuple = self.gap_tuple(&previous_input, input, fraction, forest)?;
                let ts = previous_ts + (k as f64 * average) as u64;
                self.admit(&tuple, true, ts, true, out);
            }
        }
        Ok(())
    }

    fn gap_tuple(
        &self,
        previous: &[f32],
        next: &[f32],
        fraction: f64,
        forest: &RcfCore,
    ) -> Result<Vec<f32>> {
        let linear = || -> Vec<f32> {
            previous
                .iter()
                .zip(next)
                .map(|(&p, &n)| p + ((n - p) as f64 * fraction) as f32)
                .collect()
        };
        match self.imputation_method {
            ImputationMethod::Fixed => Ok(self.default_fill.clone()),
            ImputationMethod::Previous => Ok(Vec::from(previous)),
            ImputationMethod::Next => Ok(Vec::from(next)),
            ImputationMethod::Linear => Ok(linear()),
            ImputationMethod::Rcf => {
                if forest.is_ready() && self.is_ready() {
                    let dimensions = self.last_shingled_point.len();
                    let block = self.block_width();
                    let mut query = self.last_shingled_point.clone();
                    let mut tail = vec![0.0; block];
                    if self.forest_mode == ForestMode::TimeAugmented {
                        tail[block - 1] = self.expected_gap_value();
                    }
                    shift_into(&mut query, &tail);
                    let missing: Vec<usize> = (dimensions - block
                        ..dimensions - block + self.input_dimensions)
                        .collect();
                    let completed = forest.impute(&query, &missing)?;
                    Ok(self.invert_block(&completed))
                } else {
                    Ok(linear())
                }
            }
        }
    }

    /// Shifts one tuple into the rings, producing the new shingled point
    /// and deciding whether the forest may see it.
    fn admit(
        &mut self,
        tuple: &[f32],
        imputed: bool,
        timestamp: u64,
        update_stats: bool,
        out: &mut Vec<Vec<f32>>,
    ) {
        if self.internal_timestamp == 0 {
            // seed the rings so the first difference and gap are zero
            let d = self.input_dimensions;
            let start = self.last_inputs.len() - d;
            self.last_inputs[start..].copy_from_slice(tuple);
            for slot in self.last_timestamps.iter_mut() {
                *slot = timestamp;
            }
        }
        let previous_block = self.last_input_block().to_vec();
        let previous_ts = self.last_timestamps[self.shingle_size - 1];
        let mut block = self.transformer.transform(tuple, &previous_block);
        if self.forest_mode == ForestMode::TimeAugmented {
            block.push(self.gap_value(timestamp, previous_ts));
        }
        if update_stats {
            self.transformer.update(tuple, &previous_block);
            self.update_timestamp_stats(timestamp, previous_ts);
        }
        shift_into(&mut self.last_inputs, tuple);
        shift_into(&mut self.last_timestamps, &[timestamp]);
        shift_into(&mut self.imputed_flags, &[imputed]);
        shift_into(&mut self.last_shingled_point, &block);
        self.internal_timestamp += 1;

        let fraction = self.number_of_imputed() as f64 / self.shingle_size as f64;
        self.data_quality.update(1.0 - fraction);
        // the runaway guard only applies where tuples are synthesized
        let shingle_only = self.forest_mode == ForestMode::StreamingImpute
            && fraction > self.use_imputed_fraction as f64;
        if self.is_ready() && !shingle_only {
            out.push(self.last_shingled_point.clone());
        }
    }

    // replays the buffered warmup observations once the sketches are
    // primed with their statistics
    fn drain(&mut self, out: &mut Vec<Vec<f32>>) {
        let values = std::mem::take(&mut self.initial_values);
        let stamps = std::mem::take(&mut self.initial_timestamps);
        let mut previous = values[0].clone();
        let mut previous_ts = stamps[0];
        for (value, &ts) in values.iter().zip(&stamps) {
            self.transformer.update(value, &previous);
            self.update_timestamp_stats(ts, previous_ts);
            previous = value.clone();
            previous_ts = ts;
        }
        for (value, &ts) in values.iter().zip(&stamps) {
            self.admit(value, false, ts, false, out);
        }
    }

    fn update_timestamp_stats(&mut self, timestamp: u64, previous: u64) {
        self.timestamp_stats[0].update(timestamp as f64);
        self.timestamp_stats[1].update(timestamp.saturating_sub(previous) as f64);
        let deviation = self.timestamp_stats[0].deviation();
        let gap_mean = self.timestamp_stats[1].mean();
        let gap_deviation = self.timestamp_stats[1].deviation();
        self.timestamp_stats[2].update(deviation);
        self.timestamp_stats[3].update(gap_mean);
        self.timestamp_stats[4].update(gap_deviation);
    }

    fn timescale(&self) -> f64 {
        self.timestamp_stats[4].mean() + 1.0
    }

    fn gap_value(&self, timestamp: u64, previous: u64) -> f32 {
        (timestamp.saturating_sub(previous) as f64 * self.weight_time as f64 / self.timescale())
            as f32
    }

    fn expected_gap_value(&self) -> f32 {
        (self.timestamp_stats[3].mean() * self.weight_time as f64 / self.timescale()) as f32
    }
}

/// Plain captured state of a preprocessor; the structural fields are
/// rebuilt from the forest configuration.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PreprocessorState {
    pub transformer_deviations: Vec<Deviation>,
    pub timestamp_stats: Vec<Deviation>,
    pub data_quality: Deviation,
    pub last_inputs: Vec<f32>,
    pub last_timestamps: Vec<u64>,
    pub imputed_flags: Vec<bool>,
    pub last_shingled_point: Vec<f32>,
    pub values_seen: usize,
    pub internal_timestamp: usize,
    pub initial_values: Vec<Vec<f32>>,
    pub initial_timestamps: Vec<u64>,
}

impl Preprocessor {
    pub fn to_state(&self) -> PreprocessorState {
        PreprocessorState {
            transformer_deviations: self.transformer.deviations.clone(),
            timestamp_stats: self.timestamp_stats.clone(),
            data_quality: self.data_quality.clone(),
            last_inputs: self.last_inputs.clone(),
            last_timestamps: self.last_timestamps.clone(),
            imputed_flags: self.imputed_flags.clone(),
            last_shingled_point: self.last_shingled_point.clone(),
            values_seen: self.values_seen,
            internal_timestamp: self.internal_timestamp,
            initial_values: self.initial_values.clone(),
            initial_timestamps: self.initial_timestamps.clone(),
        }
    }

    pub fn from_state(config: &ForestConfig, state: PreprocessorState) -> Result<Self> {
        let mut preprocessor = Preprocessor::new(config)?;
        check_argument(
            state.transformer_deviations.len() == preprocessor.transformer.deviations.len(),
            "mismatched transformer state",
        )?;
        check_argument(
            state.last_inputs.len() == preprocessor.last_inputs.len()
                && state.last_shingled_point.len() == preprocessor.last_shingled_point.len(),
            "mismatched ring state",
        )?;
        preprocessor.transformer.deviations = state.transformer_deviations;
        preprocessor.timestamp_stats = state.timestamp_stats;
        preprocessor.data_quality = state.data_quality;
        preprocessor.last_inputs = state.last_inputs;
        preprocessor.last_timestamps = state.last_timestamps;
        preprocessor.imputed_flags = state.imputed_flags;
        preprocessor.last_shingled_point = state.last_shingled_point;
        preprocessor.values_seen = state.values_seen;
        preprocessor.internal_timestamp = state.internal_timestamp;
        preprocessor.initial_values = state.initial_values;
        preprocessor.initial_timestamps = state.initial_timestamps;
        Ok(preprocessor)
    }
}
