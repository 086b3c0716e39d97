//! A streaming random cut forest: an online, unsupervised sketch over
//! numeric vector streams.
//!
//! A forest maintains N small time-biased samples of the stream, one
//! random cut tree per sample, and answers queries about the most recent
//! state of the stream: anomaly scores and their per-dimension
//! attribution, conditional imputation of missing values, density
//! estimates, near neighbors within the sample and short-horizon
//! forecasts. Consumers push one observation at a time; memory is
//! bounded by the configured sample size, tree count and dimension.
//!
//! ```
//! use cutforest::RandomCutForest;
//!
//! let mut forest = RandomCutForest::builder(3, 1)
//!     .number_of_trees(20)
//!     .sample_size(64)
//!     .random_seed(42)
//!     .build()
//!     .unwrap();
//!
//! for i in 0..200u64 {
//!     let phase = i as f32 / 20.0;
//!     forest.update(&[phase.sin(), phase.cos(), 1.0], i).unwrap();
//! }
//! let score = forest.anomaly_score(&[10.0, 10.0, 10.0]).unwrap();
//! assert!(score > 1.0);
//! ```
//!
//! ### References
//!
//! Sudipto Guha, Nina Mishra, Gourav Roy, and Okke Schrijvers. *"Robust
//! random cut forest based anomaly detection on streams."* International
//! Conference on Machine Learning, pp. 2712-2721. PMLR, 2016.

pub mod common;
pub mod config;
pub mod datagen;
pub mod errors;
pub mod forest;
pub mod preprocess;
pub mod sampler;
pub mod store;
pub mod tree;
pub mod util;
pub mod visitor;

pub use common::{Deviation, DensityOutput, DiVector, InterpolationMeasure, RangeVector};
pub use config::{ForestConfig, ForestMode, ImputationMethod, Precision, TransformMethod};
pub use errors::{RcfError, Result};
pub use forest::{
    ConditionalField, ForestState, OneSidedAccumulator, RandomCutForest, RandomCutForestBuilder,
    RcfCore,
};
pub use preprocess::Preprocessor;
pub use sampler::ReservoirSampler;
pub use store::PointStore;
pub use tree::{BoundingBox, RandomCutTree};
pub use util::{l1_distance, l2_distance};
pub use visitor::{ImputedPoint, Neighbor};
