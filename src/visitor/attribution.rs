use num::abs;

use crate::common::divector::DiVector;
use crate::tree::node_view::NodeView;
use crate::visitor::{Visitor, VisitorSettings};
use crate::util::check_state;
use crate::errors::Result;

/// Splits the anomaly score of one tree across dimensions and directions.
///
/// The traversal mirrors `AnomalyScoreVisitor`; at each step the scalar
/// blend is applied componentwise to the directional probability of
/// separation, so the final high+low total equals the scalar score.
pub struct AttributionVisitor {
    settings: VisitorSettings,
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    use_shadow_box: bool,
    attribution: DiVector,
    probability: DiVector,
}

impl AttributionVisitor {
    pub fn new(tree_mass: usize, dimensions: usize, settings: VisitorSettings) -> Self {
        AttributionVisitor {
            settings,
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            use_shadow_box: false,
            attribution: DiVector::empty(dimensions),
            probability: DiVector::empty(dimensions),
        }
    }
}

impl Visitor for AttributionVisitor {
    type Output = DiVector;

    fn accept_leaf(&mut self, point: &[f32], view: &NodeView) -> Result<()> {
        let mass = view.mass();
        if mass > self.settings.ignore_mass {
            if view.is_duplicate() {
                self.score = (self.settings.damp)(mass, self.tree_mass)
                    * (self.settings.score_seen)(view.depth(), mass);
                self.hit_duplicate = true;
                self.use_shadow_box = true;
            } else {
                self.score = (self.settings.score_unseen)(view.depth(), mass);
                let leaf_box = view.bounding_box().expect("view holds the leaf box");
                self.probability.assign_probability_of_cut(leaf_box, point);
                check_state(
                    abs(self.probability.total() - 1.0) < 1e-6,
                    "leaf separation probability must be one",
                )?;
                self.attribution.add_scaled(&self.probability, self.score);
            }
        } else {
            self.score = (self.settings.score_unseen)(view.depth(), mass);
            self.use_shadow_box = true;
        }
        Ok(())
    }

    fn accept_node(&mut self, point: &[f32], view: &NodeView) -> Result<()> {
        if self.converged {
            return Ok(());
        }
        let bounding_box = if self.use_shadow_box {
            view.shadow_bounding_box()
        } else {
            view.bounding_box()
        };
        let bounding_box = bounding_box.expect("view maintains boxes on ascent");
        self.probability.assign_probability_of_cut(bounding_box, point);
        let probability = self.probability.total();
        if probability == 0.0 {
            self.converged = true;
            return Ok(());
        }
        let new_value = (self.settings.score_unseen)(view.depth(), view.mass());
        if !self.hit_duplicate {
            self.score = (1.0 - probability) * self.score + probability * new_value;
        }
        self.attribution.scale(1.0 - probability);
        self.attribution.add_scaled(&self.probability, new_value);
        Ok(())
    }

    fn result(&self) -> Result<DiVector> {
        let total = (self.settings.normalizer)(self.score, self.tree_mass);
        let mut answer = self.attribution.clone();
        answer.normalize(total);
        Ok(answer)
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn wants_shadow_box(&self) -> bool {
        self.use_shadow_box
    }
}
