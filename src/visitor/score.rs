use crate::tree::node_view::NodeView;
use crate::visitor::{Visitor, VisitorSettings};
use crate::errors::Result;

/// Computes the expected-inverse-depth anomaly score of one tree.
///
/// At the leaf the score starts from the seen/unseen contribution; on the
/// way up each node blends in the unseen contribution weighted by the
/// probability that a random cut would have separated the query from the
/// subtree below. Once the query falls inside a subtree's box the score
/// can no longer change and the traversal converges.
pub struct AnomalyScoreVisitor {
    settings: VisitorSettings,
    tree_mass: usize,
    score: f64,
    converged: bool,
    use_shadow_box: bool,
}

impl AnomalyScoreVisitor {
    pub fn new(tree_mass: usize, settings: VisitorSettings) -> Self {
        AnomalyScoreVisitor {
            settings,
            tree_mass,
            score: 0.0,
            converged: false,
            use_shadow_box: false,
        }
    }
}

impl Visitor for AnomalyScoreVisitor {
    type Output = f64;

    fn accept_leaf(&mut self, _point: &[f32], view: &NodeView) -> Result<()> {
        let mass = view.mass();
        if mass > self.settings.ignore_mass {
            if view.is_duplicate() {
                self.score = (self.settings.damp)(mass, self.tree_mass)
                    * (self.settings.score_seen)(view.depth(), mass);
                self.converged = true;
            } else {
                self.score = (self.settings.score_unseen)(view.depth(), mass);
            }
        } else {
            // the landing leaf is being ignored; score against the
            // counterfactual tree without it
            self.score = (self.settings.score_unseen)(view.depth(), mass);
            self.use_shadow_box = true;
        }
        Ok(())
    }

    fn accept_node(&mut self, _point: &[f32], view: &NodeView) -> Result<()> {
        if self.converged {
            return Ok(());
        }
        let probability = if self.use_shadow_box {
            view.shadow_probability_of_cut()
        } else {
            view.probability_of_cut()
        };
        if probability == 0.0 {
            self.converged = true;
        } else {
            self.score = (1.0 - probability) * self.score
                + probability * (self.settings.score_unseen)(view.depth(), view.mass());
        }
        Ok(())
    }

    fn result(&self) -> Result<f64> {
        Ok((self.settings.normalizer)(self.score, self.tree_mass))
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn wants_shadow_box(&self) -> bool {
        self.use_shadow_box
    }
}
