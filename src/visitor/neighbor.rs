use crate::tree::node_view::NodeView;
use crate::visitor::Visitor;
use crate::util::l2_distance;
use crate::errors::Result;

/// A point found near a query, with the sequence indexes it was admitted
/// under (when the forest stores them) and the number of trees whose
/// traversal terminated at it.
#[derive(Clone, Debug)]
pub struct Neighbor {
    pub point: Vec<f32>,
    pub distance: f64,
    pub sequence_indexes: Vec<u64>,
    pub trees: usize,
}

/// Reports the leaf at the traversal terminus when its Euclidean distance
/// to the query is within the threshold. The ascent is skipped entirely.
pub struct NearNeighborVisitor {
    threshold: f64,
    answer: Option<Neighbor>,
    done: bool,
}

impl NearNeighborVisitor {
    pub fn new(threshold: f64) -> Self {
        NearNeighborVisitor {
            threshold,
            answer: None,
            done: false,
        }
    }
}

impl Visitor for NearNeighborVisitor {
    type Output = Option<Neighbor>;

    fn accept_leaf(&mut self, point: &[f32], view: &NodeView) -> Result<()> {
        let distance = l2_distance(point, view.leaf_point());
        if distance <= self.threshold {
            self.answer = Some(Neighbor {
                point: Vec::from(view.leaf_point()),
                distance,
                sequence_indexes: Vec::from(view.leaf_sequences()),
                trees: 1,
            });
        }
        self.done = true;
        Ok(())
    }

    fn accept_node(&mut self, _point: &[f32], _view: &NodeView) -> Result<()> {
        Ok(())
    }

    fn result(&self) -> Result<Option<Neighbor>> {
        Ok(self.answer.clone())
    }

    fn converged(&self) -> bool {
        self.done
    }
}
