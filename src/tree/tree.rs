use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::store::intervals::IntervalManager;
use crate::store::points::PointStore;
use crate::tree::bounding_box::BoundingBox;
use crate::tree::cut::{Cut, NO_CUT};
use crate::tree::node_store::{NodeStore, NULL_NODE};
use crate::tree::node_view::NodeView;
use crate::util::{check_argument, check_state};
use crate::visitor::{MultiVisitor, Visitor};
use crate::errors::{RcfError, Result};

/// A random cut tree over a sample of point handles.
///
/// Insertion walks from the leaf the point would land at back towards the
/// root, proposing one random cut per level on the bounding box of the
/// subtree merged with the point; the separation closest to the root wins
/// and a new internal node is spliced in there. Deletion reverses the
/// process by splicing the leaf's sibling into its parent's place. A
/// point equal to an existing leaf never creates nodes; it only raises
/// that leaf's mass.
pub struct RandomCutTree {
    pub(crate) dimensions: usize,
    pub(crate) capacity: usize,
    pub(crate) nodes: NodeStore,
    pub(crate) root: usize,
    pub(crate) tree_mass: usize,
    pub(crate) random_seed: u64,
}

impl RandomCutTree {
    pub fn new(
        dimensions: usize,
        capacity: usize,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass: bool,
        random_seed: u64,
    ) -> Result<Self> {
        check_argument(dimensions > 0, "dimensions must be positive")?;
        Ok(RandomCutTree {
            dimensions,
            capacity,
            nodes: NodeStore::new(
                capacity,
                dimensions,
                bounding_box_cache_fraction,
                store_sequence_indexes,
                center_of_mass,
            )?,
            root: NULL_NODE,
            tree_mass: 0,
            random_seed,
        })
    }

    pub fn mass(&self) -> usize {
        self.tree_mass
    }

    pub fn is_empty(&self) -> bool {
        self.root == NULL_NODE
    }

    /// Inserts the point behind `point_handle` and returns the handle the
    /// tree actually references, which is the existing leaf's handle when
    /// the point is a duplicate.
    pub fn add(
        &mut self,
        point_handle: usize,
        sequence: u64,
        store: &PointStore,
    ) -> Result<usize> {
        if self.root == NULL_NODE {
            self.root = self.nodes.leaf_node(point_handle);
            self.tree_mass = 1;
            self.nodes.record_sequence(point_handle, sequence);
            return Ok(point_handle);
        }

        let point = store.copy(point_handle)?;
        let mut path = self.nodes.path_to_leaf(self.root, &point);
        let (leaf, leaf_sibling) = path.pop().expect("path reaches a leaf");
        let leaf_handle = self.nodes.point_handle_of(leaf)?;

        self.tree_mass += 1;
        if store.is_equal(&point, leaf_handle)? {
            self.nodes.increase_leaf_mass(leaf);
            self.nodes.record_sequence(leaf_handle, sequence);
            self.nodes.ancestors_after_add(&mut path, &point, true)?;
            return Ok(leaf_handle);
        }

        // walk upward, proposing one cut per level; the last separation
        // seen (closest to the root) is where the new node goes
        let leaf_point = store.copy(leaf_handle)?;
        let mut current_box = BoundingBox::from_point(&leaf_point);
        let mut saved_box = current_box.clone();
        let mut saved_cut = Cut::none();
        let mut saved_node = leaf;
        let mut saved_parent = path.last().map(|&(n, _)| n).unwrap_or(NULL_NODE);
        let mut parent = saved_parent;
        let mut node = leaf;
        let mut sibling = leaf_sibling;
        let mut replay: Vec<(usize, usize)> = Vec::new();

        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();
        loop {
            let factor: f64 = rng.gen();
            let (cut, separated) = Cut::random_cut_and_separation(&current_box, factor, &point);
            if separated {
                saved_cut = cut;
                saved_parent = parent;
                saved_node = node;
                saved_box = current_box.clone();
                replay.clear();
            } else {
                replay.push((node, sibling));
            }
            check_state(saved_cut.dimension != NO_CUT, "no separating cut found")?;

            if parent == NULL_NODE {
                break;
            }
            self.nodes
                .extend_with_subtree(&mut current_box, sibling, store)?;
            let (next_node, next_sibling) = path.pop().expect("parent is on the path");
            node = next_node;
            sibling = next_sibling;
            parent = path.last().map(|&(n, _)| n).unwrap_or(NULL_NODE);
        }

        if saved_parent != NULL_NODE {
            while let Some(entry) = replay.pop() {
                path.push(entry);
            }
            check_state(
                path.last().map(|&(n, _)| n) == Some(saved_parent),
                "path does not end at the insertion parent",
            )?;
        } else {
            check_state(path.is_empty(), "dangling path above the root")?;
        }

        let merged = self.nodes.add_node(
            saved_parent,
            &point,
            saved_node,
            point_handle,
            saved_cut,
            &saved_box,
            store,
        )?;
        self.nodes.record_sequence(point_handle, sequence);
        if saved_parent != NULL_NODE {
            self.nodes.ancestors_after_add(&mut path, &point, false)?;
        } else {
            self.root = merged;
            self.nodes.set_root_parent(merged);
        }
        Ok(point_handle)
    }

    /// Removes one occurrence of the point behind `point_handle`.
    /// Deleting a point the tree does not hold corrupts nothing but is
    /// reported as an invariant violation.
    pub fn delete(
        &mut self,
        point_handle: usize,
        sequence: u64,
        store: &PointStore,
    ) -> Result<usize> {
        check_state(self.root != NULL_NODE, "delete from an empty tree")?;
        let point = store.copy(point_handle)?;
        let mut path = self.nodes.path_to_leaf(self.root, &point);
        let (leaf, leaf_sibling) = path.pop().expect("path reaches a leaf");
        let leaf_handle = self.nodes.point_handle_of(leaf)?;

        if leaf_handle != point_handle && !store.is_equal(&point, leaf_handle)? {
            return Err(RcfError::InvariantViolation {
                msg: "delete of a point the tree does not hold",
            });
        }
        self.nodes.remove_sequence(leaf_handle, sequence)?;
        self.tree_mass -= 1;

        if self.nodes.decrease_leaf_mass(leaf) == 0 {
            if path.is_empty() {
                self.root = NULL_NODE;
            } else {
                let (parent, _sibling) = path.pop().expect("leaf has a parent");
                let grand_parent = path.last().map(|&(n, _)| n).unwrap_or(NULL_NODE);
                if grand_parent == NULL_NODE {
                    self.root = leaf_sibling;
                    self.nodes.set_root_parent(leaf_sibling);
                } else {
                    self.nodes.replace_child(grand_parent, parent, leaf_sibling);
                    self.nodes
                        .ancestors_after_delete(&mut path, &point, false, store)?;
                }
                self.nodes.delete_internal_node(parent);
            }
        } else {
            self.nodes
                .ancestors_after_delete(&mut path, &point, true, store)?;
        }
        Ok(leaf_handle)
    }

    /// Runs a visitor along the root-to-leaf path of `point`, calling
    /// back post-order on the ascent. Returns false when the tree is
    /// empty and the visitor never ran.
    pub fn traverse<V: Visitor>(
        &self,
        point: &[f32],
        store: &PointStore,
        visitor: &mut V,
    ) -> Result<bool> {
        if self.root == NULL_NODE {
            return Ok(false);
        }
        let mut view = NodeView::new(self.root, self.tree_mass);
        self.traverse_recursive(point, &mut view, visitor, store)?;
        Ok(true)
    }

    fn traverse_recursive<V: Visitor>(
        &self,
        point: &[f32],
        view: &mut NodeView,
        visitor: &mut V,
        store: &PointStore,
    ) -> Result<()> {
        let node = view.node();
        if self.nodes.is_leaf(node) {
            view.visit_leaf(point, node, &self.nodes, store)?;
            visitor.accept_leaf(point, view)?;
            if visitor.wants_shadow_box() {
                view.enable_shadow_box();
            }
        } else {
            view.descend(point, &self.nodes);
            self.traverse_recursive(point, view, visitor, store)?;
            if !visitor.converged() {
                view.ascend(point, node, &self.nodes, store)?;
                visitor.accept_node(point, view)?;
            }
        }
        Ok(())
    }

    /// As `traverse`, but a cut on a missing coordinate explores both
    /// children and merges them through the visitor.
    pub fn traverse_multi<V: MultiVisitor>(
        &self,
        point: &[f32],
        missing: &[bool],
        store: &PointStore,
        visitor: &mut V,
    ) -> Result<bool> {
        if self.root == NULL_NODE {
            return Ok(false);
        }
        let mut view = NodeView::new(self.root, self.tree_mass);
        self.traverse_multi_recursive(point, missing, &mut view, visitor, store)?;
        Ok(true)
    }

    fn traverse_multi_recursive<V: MultiVisitor>(
        &self,
        point: &[f32],
        missing: &[bool],
        view: &mut NodeView,
        visitor: &mut V,
        store: &PointStore,
    ) -> Result<()> {
        let node = view.node();
        if self.nodes.is_leaf(node) {
            view.visit_leaf(point, node, &self.nodes, store)?;
            visitor.accept_leaf(point, view)?;
            return Ok(());
        }
        if missing[self.nodes.cut_dimension(node)] {
            let left = self.nodes.left(node);
            let right = self.nodes.right(node);
            view.descend_to(left);
            self.traverse_multi_recursive(point, missing, view, visitor, store)?;
            let saved_box = view.box_snapshot();
            view.move_to_sibling(right);
            self.traverse_multi_recursive(point, missing, view, visitor, store)?;
            visitor.combine_branches(point, view)?;
            if !visitor.converged() {
                view.merge_branches(point, missing, node, saved_box, &self.nodes)?;
            }
        } else {
            view.descend(point, &self.nodes);
            self.traverse_multi_recursive(point, missing, view, visitor, store)?;
            if !visitor.converged() {
                view.ascend_masked(point, missing, node, &self.nodes, store)?;
            }
        }
        if !visitor.converged() {
            visitor.accept_node(point, view)?;
        }
        Ok(())
    }

    pub fn leaf_sequences(&self, point_handle: usize) -> Vec<u64> {
        self.nodes.leaf_sequences(point_handle)
    }

    pub fn center_of_mass(&self, store: &PointStore) -> Result<Vec<f32>> {
        if self.root == NULL_NODE {
            return Ok(vec![0.0; self.dimensions]);
        }
        self.nodes.center_of_mass(self.root, store)
    }

    /// Structural consistency check used by tests: masses, partitions and
    /// cached boxes.
    pub fn validate(&self, store: &PointStore) -> Result<()> {
        if self.root == NULL_NODE {
            check_state(self.tree_mass == 0, "empty tree with non-zero mass")?;
            return Ok(());
        }
        let (mass, _hull) = self.nodes.validate_subtree(self.root, store)?;
        check_state(mass == self.tree_mass, "root mass does not match the tree")?;
        Ok(())
    }
}

/// Plain captured state of one tree.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeState {
    pub dimensions: usize,
    pub capacity: usize,
    pub cache_limit: usize,
    pub left: Vec<usize>,
    pub right: Vec<usize>,
    pub parent: Vec<usize>,
    pub mass: Vec<usize>,
    pub cut_dimension: Vec<usize>,
    pub cut_value: Vec<f32>,
    pub box_data: Vec<f32>,
    pub range_sum: Vec<f64>,
    pub leaf_extra_mass: Vec<(usize, usize)>,
    pub leaf_sequences: Option<Vec<(usize, Vec<u64>)>>,
    pub point_sum: Option<Vec<f64>>,
    pub free: IntervalManager,
    pub root: usize,
    pub tree_mass: usize,
    pub random_seed: u64,
}

impl RandomCutTree {
    pub fn to_state(&self) -> TreeState {
        let mut leaf_extra_mass: Vec<(usize, usize)> = self
            .nodes
            .leaf_extra_mass
            .iter()
            .map(|(&k, &v)| (k, v))
            .collect();
        leaf_extra_mass.sort_unstable();
        let leaf_sequences = self.nodes.leaf_sequences.as_ref().map(|map| {
            let mut entries: Vec<(usize, Vec<u64>)> =
                map.iter().map(|(&k, v)| (k, v.clone())).collect();
            entries.sort_unstable();
            entries
        });
        TreeState {
            dimensions: self.dimensions,
            capacity: self.capacity,
            cache_limit: self.nodes.cache_limit,
            left: self.nodes.left.clone(),
            right: self.nodes.right.clone(),
            parent: self.nodes.parent.clone(),
            mass: self.nodes.mass.clone(),
            cut_dimension: self.nodes.cut_dimension.clone(),
            cut_value: self.nodes.cut_value.clone(),
            box_data: self.nodes.box_data.clone(),
            range_sum: self.nodes.range_sum.clone(),
            leaf_extra_mass,
            leaf_sequences,
            point_sum: self.nodes.point_sum.clone(),
            free: self.nodes.free.clone(),
            root: self.root,
            tree_mass: self.tree_mass,
            random_seed: self.random_seed,
        }
    }

    pub fn from_state(state: TreeState) -> Result<Self> {
        let slots = state.capacity.saturating_sub(1);
        check_argument(
            state.left.len() == slots && state.right.len() == slots,
            "mismatched node arrays",
        )?;
        let nodes = NodeStore {
            capacity: state.capacity,
            dimensions: state.dimensions,
            cache_limit: state.cache_limit,
            left: state.left,
            right: state.right,
            parent: state.parent,
            mass: state.mass,
            cut_dimension: state.cut_dimension,
            cut_value: state.cut_value,
            box_data: state.box_data,
            range_sum: state.range_sum,
            leaf_extra_mass: state.leaf_extra_mass.into_iter().collect::<HashMap<_, _>>(),
            leaf_sequences: state
                .leaf_sequences
                .map(|entries| entries.into_iter().collect()),
            point_sum: state.point_sum,
            free: state.free,
        };
        Ok(RandomCutTree {
            dimensions: state.dimensions,
            capacity: state.capacity,
            nodes,
            root: state.root,
            tree_mass: state.tree_mass,
            random_seed: state.random_seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Precision;

    fn fresh_store(dimensions: usize) -> PointStore {
        PointStore::new(dimensions, 1, 256, 64, false, false, Precision::Single).unwrap()
    }

    fn populate(
        tree: &mut RandomCutTree,
        store: &mut PointStore,
        points: &[Vec<f32>],
    ) -> Vec<usize> {
        let mut handles = Vec::new();
        for (i, p) in points.iter().enumerate() {
            let handle = store.add(p).unwrap();
            let used = tree.add(handle, i as u64, store).unwrap();
            if used != handle {
                store.increment(used).unwrap();
                store.decrement(handle).unwrap();
            }
            handles.push(used);
        }
        handles
    }

    fn grid_points(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| vec![(i % 7) as f32, (i / 7) as f32 + 0.5 * (i % 3) as f32])
            .collect()
    }

    #[test]
    fn masses_and_boxes_stay_consistent() {
        let mut store = fresh_store(2);
        let mut tree = RandomCutTree::new(2, 64, 1.0, false, false, 7).unwrap();
        let points = grid_points(40);
        populate(&mut tree, &mut store, &points);
        assert_eq!(tree.mass(), 40);
        tree.validate(&store).unwrap();
    }

    #[test]
    fn duplicates_fold_into_one_leaf() {
        let mut store = fresh_store(2);
        let mut tree = RandomCutTree::new(2, 8, 1.0, true, false, 11).unwrap();
        let a = store.add(&[1.0, 1.0]).unwrap();
        let b = store.add(&[1.0, 1.0]).unwrap();
        let first = tree.add(a, 0, &store).unwrap();
        let second = tree.add(b, 1, &store).unwrap();
        assert_eq!(first, a);
        assert_eq!(second, a);
        assert_eq!(tree.mass(), 2);
        assert_eq!(tree.leaf_sequences(a), vec![0, 1]);
        tree.validate(&store).unwrap();
        tree.delete(a, 0, &store).unwrap();
        assert_eq!(tree.mass(), 1);
        assert_eq!(tree.leaf_sequences(a), vec![1]);
    }

    #[test]
    fn add_then_delete_restores_structure() {
        let mut store = fresh_store(2);
        let mut tree = RandomCutTree::new(2, 64, 0.5, false, false, 13).unwrap();
        let points = grid_points(20);
        populate(&mut tree, &mut store, &points);

        let before = tree.to_state();
        let extra = store.add(&[100.0, -40.0]).unwrap();
        tree.add(extra, 99, &store).unwrap();
        tree.validate(&store).unwrap();
        tree.delete(extra, 99, &store).unwrap();
        store.decrement(extra).unwrap();
        tree.validate(&store).unwrap();

        let after = tree.to_state();
        assert_eq!(before.root, after.root);
        assert_eq!(before.tree_mass, after.tree_mass);
        assert_eq!(before.left, after.left);
        assert_eq!(before.right, after.right);
        assert_eq!(before.mass, after.mass);
        assert_eq!(before.cut_dimension, after.cut_dimension);
        assert_eq!(before.cut_value, after.cut_value);
        assert_eq!(before.leaf_extra_mass, after.leaf_extra_mass);
    }

    #[test]
    fn delete_of_missing_point_is_an_invariant_violation() {
        let mut store = fresh_store(2);
        let mut tree = RandomCutTree::new(2, 8, 1.0, false, false, 17).unwrap();
        let a = store.add(&[0.0, 0.0]).unwrap();
        let b = store.add(&[5.0, 5.0]).unwrap();
        tree.add(a, 0, &store).unwrap();
        assert!(matches!(
            tree.delete(b, 0, &store),
            Err(RcfError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn center_of_mass_tracks_the_sample_mean(){
        let mut store = fresh_store(2);
        let mut tree = RandomCutTree::new(2, 16, 1.0, false, true, 19).unwrap();
        let points = vec![
            vec![0.0, 0.0],
            vec![2.0, 2.0],
            vec![4.0, 1.0],
            vec![6.0, 5.0],
        ];
        populate(&mut tree, &mut store, &points);
        let center = tree.center_of_mass(&store).unwrap();
        assert!((center[0] - 3.0).abs() < 1e-6);
        assert!((center[1] - 2.0).abs() < 1e-6);
    }
}
