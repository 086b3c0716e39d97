use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::tree::node_view::NodeView;
use crate::visitor::{MultiVisitor, Visitor, VisitorSettings};
use crate::util::check_state;
use crate::errors::Result;

/// One tree's answer to a conditional query: the completed point, its
/// centrality-adjusted anomaly score over the tree and its distance to
/// the leaf that supplied the completion.
#[derive(Clone, Debug)]
pub struct ImputedPoint {
    pub score: f64,
    pub point: Vec<f32>,
    pub distance: f64,
}

struct Branch {
    converged: bool,
    score: f64,
    random: f64,
    point: Vec<f32>,
    distance: f64,
}

/// Multi-visitor that explores both sides of any cut on a missing
/// coordinate. Each exploration ends at a leaf which proposes a
/// completion; explorations are merged by keeping the branch with the
/// lower adjusted score. `centrality` interpolates between ranking by
/// anomaly score (1.0) and a uniformly random draw from the reachable
/// leaves (0.0).
pub struct ImputeVisitor {
    settings: VisitorSettings,
    tree_mass: usize,
    centrality: f64,
    missing: Vec<usize>,
    rng: ChaCha20Rng,
    stack: Vec<Branch>,
}

impl ImputeVisitor {
    pub fn new(
        missing: &[usize],
        centrality: f64,
        tree_mass: usize,
        seed: u64,
        settings: VisitorSettings,
    ) -> Self {
        ImputeVisitor {
            settings,
            tree_mass,
            centrality,
            missing: Vec::from(missing),
            rng: ChaCha20Rng::seed_from_u64(seed),
            stack: Vec::new(),
        }
    }

    fn adjusted_score(&self, branch: &Branch) -> f64 {
        self.centrality * (self.settings.normalizer)(branch.score, self.tree_mass)
            + (1.0 - self.centrality) * branch.random
    }
}

impl Visitor for ImputeVisitor {
    type Output = ImputedPoint;

    fn accept_leaf(&mut self, point: &[f32], view: &NodeView) -> Result<()> {
        let mass = view.mass();
        let leaf_point = view.leaf_point();
        let mut completion = Vec::from(point);
        for &i in &self.missing {
            completion[i] = leaf_point[i];
        }
        let duplicate = completion == leaf_point;
        let (score, converged) = if duplicate {
            (
                (self.settings.damp)(mass, self.tree_mass)
                    * (self.settings.score_seen)(view.depth(), mass),
                true,
            )
        } else {
            ((self.settings.score_unseen)(view.depth(), mass), false)
        };
        let distance = (self.settings.distance)(&completion, leaf_point);
        self.stack.push(Branch {
            converged,
            score,
            random: self.rng.gen::<f64>(),
            point: completion,
            distance,
        });
        Ok(())
    }

    fn accept_node(&mut self, _point: &[f32], view: &NodeView) -> Result<()> {
        let top = self.stack.last_mut().expect("a leaf was visited");
        if !top.converged {
            // the masked probability never charges missing coordinates,
            // whose completed values sit inside the box by construction
            let probability = view.probability_of_cut();
            if probability == 0.0 {
                top.converged = true;
            } else {
                top.score = (1.0 - probability) * top.score
                    + probability * (self.settings.score_unseen)(view.depth(), view.mass());
            }
        }
        Ok(())
    }

    fn result(&self) -> Result<ImputedPoint> {
        check_state(self.stack.len() == 1, "unmerged branches at the root")?;
        let top = self.stack.last().expect("stack holds one branch");
        Ok(ImputedPoint {
            score: (self.settings.normalizer)(top.score, self.tree_mass),
            point: top.point.clone(),
            distance: top.distance,
        })
    }

    fn converged(&self) -> bool {
        self.stack.last().map(|b| b.converged).unwrap_or(false)
    }
}

impl MultiVisitor for ImputeVisitor {
    fn combine_branches(&mut self, _point: &[f32], _view: &NodeView) -> Result<()> {
        let second = self.stack.pop().expect("branch stack underflow");
        let first = self.stack.pop().expect("branch stack underflow");
        let converged = first.converged || second.converged;
        let mut winner = if self.adjusted_score(&second) < self.adjusted_score(&first) {
            second
        } else {
            first
        };
        winner.converged = converged;
        self.stack.push(winner);
        Ok(())
    }
}
