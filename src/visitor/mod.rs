pub mod attribution;
pub mod density;
pub mod impute;
pub mod neighbor;
pub mod score;

pub use attribution::AttributionVisitor;
pub use density::DensityVisitor;
pub use impute::{ImputeVisitor, ImputedPoint};
pub use neighbor::{NearNeighborVisitor, Neighbor};
pub use score::AnomalyScoreVisitor;

use crate::tree::node_view::NodeView;
use crate::util::l1_distance;
use crate::errors::Result;

// Contribution of a previously seen leaf of mass m reached at the given
// depth: 1 / (depth + log2(1 + m)).
pub(crate) fn score_seen(depth: usize, mass: usize) -> f64 {
    1.0 / (depth as f64 + f64::log2(1.0 + mass as f64))
}

pub(crate) fn score_unseen(depth: usize, _mass: usize) -> f64 {
    1.0 / (depth as f64 + 1.0)
}

// Raw tree scores are multiplied by log2(1 + sample size) so the expected
// score of an inlier is close to one regardless of the sample size.
pub(crate) fn normalizer(score: f64, tree_mass: usize) -> f64 {
    score * f64::log2(1.0 + tree_mass as f64)
}

// Damps the score of points that were already admitted many times.
pub(crate) fn damp(leaf_mass: usize, tree_mass: usize) -> f64 {
    1.0 - leaf_mass as f64 / (2.0 * tree_mass as f64)
}

/// The scoring callbacks a traversal carries: how previously seen and
/// unseen leaves contribute, how duplicates are damped, how a raw tree
/// score is normalized, and the distance used by distance-based queries.
#[derive(Clone, Copy)]
pub struct VisitorSettings {
    pub ignore_mass: usize,
    pub score_seen: fn(usize, usize) -> f64,
    pub score_unseen: fn(usize, usize) -> f64,
    pub damp: fn(usize, usize) -> f64,
    pub normalizer: fn(f64, usize) -> f64,
    pub distance: fn(&[f32], &[f32]) -> f64,
}

impl Default for VisitorSettings {
    fn default() -> Self {
        VisitorSettings {
            ignore_mass: 0,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1_distance,
        }
    }
}

impl VisitorSettings {
    pub fn with_distance(distance: fn(&[f32], &[f32]) -> f64) -> Self {
        VisitorSettings {
            distance,
            ..Default::default()
        }
    }
}

/// A traversal callback set. The tree calls `accept_leaf` at the end of
/// the descent and `accept_node` at each internal node on the way back
/// up; `result` produces the tree's answer. `converged` short-circuits
/// the remaining ascent and `wants_shadow_box` asks the view to maintain
/// the leaf-excluding counterfactual box.
pub trait Visitor {
    type Output;

    fn accept_leaf(&mut self, point: &[f32], view: &NodeView) -> Result<()>;
    fn accept_node(&mut self, point: &[f32], view: &NodeView) -> Result<()>;
    fn result(&self) -> Result<Self::Output>;

    fn converged(&self) -> bool {
        false
    }

    fn wants_shadow_box(&self) -> bool {
        false
    }
}

/// A visitor that can explore both sides of a cut when the cut dimension
/// is missing from the query, and merge the two explorations.
pub trait MultiVisitor: Visitor {
    fn combine_branches(&mut self, point: &[f32], view: &NodeView) -> Result<()>;
}
