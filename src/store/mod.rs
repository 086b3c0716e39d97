pub mod intervals;
pub mod points;

pub use intervals::IntervalManager;
pub use points::{PointStore, PointStoreState};
