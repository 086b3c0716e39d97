use crate::common::interpolation::InterpolationMeasure;
use crate::tree::node_view::NodeView;
use crate::visitor::{Visitor, VisitorSettings};
use crate::errors::Result;

/// Accumulates the directional interpolation measure of one tree, from
/// which density and directional density are derived. Seen and unseen
/// points are treated nearly alike here; only similarity matters for
/// density estimation.
pub struct DensityVisitor {
    settings: VisitorSettings,
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    use_shadow_box: bool,
    measure: InterpolationMeasure,
}

impl DensityVisitor {
    pub fn new(tree_mass: usize, dimensions: usize, settings: VisitorSettings) -> Self {
        DensityVisitor {
            settings,
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            use_shadow_box: false,
            measure: InterpolationMeasure::empty(dimensions, tree_mass as f64),
        }
    }
}

impl Visitor for DensityVisitor {
    type Output = InterpolationMeasure;

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
                self.measure.update(point, leaf_box, self.score);
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
        let new_value = (self.settings.score_unseen)(view.depth(), view.mass());
        let probability = self.measure.update(point, bounding_box, new_value);
        if probability == 0.0 {
            self.converged = true;
        } else if !self.hit_duplicate {
            self.score = (1.0 - probability) * self.score + probability * new_value;
        }
        Ok(())
    }

    fn result(&self) -> Result<InterpolationMeasure> {
        let total = (self.settings.normalizer)(self.score, self.tree_mass);
        let mut answer = self.measure.clone();
        answer.measure.normalize(total);
        Ok(answer)
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn wants_shadow_box(&self) -> bool {
        self.use_shadow_box
    }
}
