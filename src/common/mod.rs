pub mod deviation;
pub mod divector;
pub mod interpolation;
pub mod rangevector;

pub use deviation::Deviation;
pub use divector::DiVector;
pub use interpolation::{DensityOutput, InterpolationMeasure};
pub use rangevector::RangeVector;
