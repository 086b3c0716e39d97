pub mod bounding_box;
pub mod cut;
pub mod node_store;
pub mod node_view;
pub mod tree;

pub use bounding_box::BoundingBox;
pub use node_view::NodeView;
pub use tree::{RandomCutTree, TreeState};
