use std::collections::HashMap;

use crate::store::intervals::IntervalManager;
use crate::store::points::PointStore;
use crate::tree::bounding_box::BoundingBox;
use crate::tree::cut::Cut;
use crate::util::{check_argument, check_state};
use crate::errors::Result;

pub(crate) const NULL_NODE: usize = usize::MAX;

/// Arena for the internal nodes of one tree, as flat parallel arrays.
///
/// A tree over at most `capacity` leaves has at most `capacity - 1`
/// internal nodes; those occupy slots `0..capacity-1`. Leaves are not
/// materialized: the node index `capacity + h` denotes the leaf holding
/// point handle `h`. Leaf mass beyond one and per-leaf sequence sets are
/// sparse side tables.
///
/// Bounding boxes are cached for slots below `cache_limit` and
/// recomputed from the children on demand elsewhere. Slot numbers are
/// recycled uniformly, so the cached population tracks the configured
/// fraction of live nodes.
pub(crate) struct NodeStore {
    pub(crate) capacity: usize,
    pub(crate) dimensions: usize,
    pub(crate) cache_limit: usize,
    pub(crate) left: Vec<usize>,
    pub(crate) right: Vec<usize>,
    pub(crate) parent: Vec<usize>,
    pub(crate) mass: Vec<usize>,
    pub(crate) cut_dimension: Vec<usize>,
    pub(crate) cut_value: Vec<f32>,
    pub(crate) box_data: Vec<f32>,
    pub(crate) range_sum: Vec<f64>,
    pub(crate) leaf_extra_mass: HashMap<usize, usize>,
    pub(crate) leaf_sequences: Option<HashMap<usize, Vec<u64>>>,
    pub(crate) point_sum: Option<Vec<f64>>,
    pub(crate) free: IntervalManager,
}

impl NodeStore {
    pub fn new(
        capacity: usize,
        dimensions: usize,
        bounding_box_cache_fraction: f64,
        store_sequences: bool,
        center_of_mass: bool,
    ) -> Result<Self> {
        check_argument(capacity > 1, "tree capacity must exceed 1")?;
        check_argument(
            (0.0..=1.0).contains(&bounding_box_cache_fraction),
            "cache fraction must lie in [0, 1]",
        )?;
        let slots = capacity - 1;
        let cache_limit = (bounding_box_cache_fraction * slots as f64).ceil() as usize;
        Ok(NodeStore {
            capacity,
            dimensions,
            cache_limit,
            left: vec![NULL_NODE; slots],
            right: vec![NULL_NODE; slots],
            parent: vec![NULL_NODE; slots],
            mass: vec![0; slots],
            cut_dimension: vec![NULL_NODE; slots],
            cut_value: vec![0.0; slots],
            box_data: vec![0.0; 2 * dimensions * cache_limit],
            range_sum: vec![0.0; cache_limit],
            leaf_extra_mass: HashMap::new(),
            leaf_sequences: if store_sequences {
                Some(HashMap::new())
            } else {
                None
            },
            point_sum: if center_of_mass {
                Some(vec![0.0; slots * dimensions])
            } else {
                None
            },
            free: IntervalManager::new(slots),
        })
    }

    pub fn is_leaf(&self, index: usize) -> bool {
        index != NULL_NODE && index >= self.capacity
    }

    pub fn is_internal(&self, index: usize) -> bool {
        index != NULL_NODE && index < self.capacity
    }

    pub fn leaf_node(&self, point_handle: usize) -> usize {
        self.capacity + point_handle
    }

    pub fn point_handle_of(&self, leaf: usize) -> Result<usize> {
        check_state(self.is_leaf(leaf), "expected a leaf node")?;
        Ok(leaf - self.capacity)
    }

    pub fn mass(&self, index: usize) -> usize {
        if self.is_leaf(index) {
            1 + self
                .leaf_extra_mass
                .get(&(index - self.capacity))
                .copied()
                .unwrap_or(0)
        } else {
            self.mass[index]
        }
    }

    pub fn cut_dimension(&self, index: usize) -> usize {
        self.cut_dimension[index]
    }

    pub fn cut_value(&self, index: usize) -> f32 {
        self.cut_value[index]
    }

    pub fn left(&self, index: usize) -> usize {
        self.left[index]
    }

    pub fn right(&self, index: usize) -> usize {
        self.right[index]
    }

    pub fn sibling(&self, node: usize, parent: usize) -> usize {
        if self.left[parent] == node {
            self.right[parent]
        } else {
            self.left[parent]
        }
    }

    pub fn is_left_of(&self, index: usize, point: &[f32]) -> bool {
        point[self.cut_dimension[index]] <= self.cut_value[index]
    }

    /// Root-to-leaf path following the point's side of each cut, as
    /// (node, sibling) pairs; the root's sibling is null.
    pub fn path_to_leaf(&self, root: usize, point: &[f32]) -> Vec<(usize, usize)> {
        let mut path = vec![(root, NULL_NODE)];
        let mut node = root;
        while !self.is_leaf(node) {
            if self.is_left_of(node, point) {
                path.push((self.left[node], self.right[node]));
                node = self.left[node];
            } else {
                path.push((self.right[node], self.left[node]));
                node = self.right[node];
            }
        }
        path
    }

    pub fn increase_leaf_mass(&mut self, leaf: usize) {
        let handle = leaf - self.capacity;
        *self.leaf_extra_mass.entry(handle).or_insert(0) += 1;
    }

    /// Returns the leaf mass remaining after the decrement; zero means
    /// the leaf must be spliced out.
    pub fn decrease_leaf_mass(&mut self, leaf: usize) -> usize {
        let handle = leaf - self.capacity;
        match self.leaf_extra_mass.remove(&handle) {
            Some(extra) => {
                if extra > 1 {
                    self.leaf_extra_mass.insert(handle, extra - 1);
                }
                extra
            }
            None => 0,
        }
    }

    pub fn record_sequence(&mut self, point_handle: usize, sequence: u64) {
        if let Some(map) = self.leaf_sequences.as_mut() {
            map.entry(point_handle).or_default().push(sequence);
        }
    }

    pub fn remove_sequence(&mut self, point_handle: usize, sequence: u64) -> Result<()> {
        if let Some(map) = self.leaf_sequences.as_mut() {
            let now_empty = {
                let list = map.get_mut(&point_handle).ok_or(
                    crate::errors::RcfError::InvariantViolation {
                        msg: "sequence set missing at leaf",
                    },
                )?;
                let position = list.iter().position(|&s| s == sequence).ok_or(
                    crate::errors::RcfError::InvariantViolation {
                        msg: "sequence index missing at leaf",
                    },
                )?;
                list.swap_remove(position);
                list.is_empty()
            };
            if now_empty {
                map.remove(&point_handle);
            }
        }
        Ok(())
    }

    pub fn leaf_sequences(&self, point_handle: usize) -> Vec<u64> {
        self.leaf_sequences
            .as_ref()
            .and_then(|map| map.get(&point_handle))
            .cloned()
            .unwrap_or_default()
    }

    /// Creates the internal node merging `child` with the new leaf for
    /// `point_handle`, wiring it under `parent` (null for a new root).
    /// `saved_box` is the bounding box of `child`'s subtree.
    pub fn add_node(
        &mut self,
        parent: usize,
        point: &[f32],
        child: usize,
        point_handle: usize,
        cut: Cut,
        saved_box: &BoundingBox,
        store: &PointStore,
    ) -> Result<usize> {
        let index = self.free.get()?;
        let child_mass = self.mass(child);
        self.cut_dimension[index] = cut.dimension;
        self.cut_value[index] = cut.value;
        let leaf = self.leaf_node(point_handle);
        if point[cut.dimension] <= cut.value {
            self.left[index] = leaf;
            self.right[index] = child;
        } else {
            self.left[index] = child;
            self.right[index] = leaf;
        }
        self.mass[index] = child_mass + 1;
        self.parent[index] = parent;
        if self.is_internal(child) {
            self.parent[child] = index;
        }
        if self.cached(index) {
            let mut merged = saved_box.clone();
            merged.extend_point(point);
            self.write_cached_box(index, &merged);
        }
        if self.point_sum.is_some() {
            let mut sum = self.subtree_point_sum(child, store)?;
            for (total, &v) in sum.iter_mut().zip(point) {
                *total += v as f64;
            }
            self.write_point_sum(index, &sum);
        }
        if parent != NULL_NODE {
            self.replace_child(parent, child, index);
        }
        Ok(index)
    }

    pub fn delete_internal_node(&mut self, index: usize) {
        self.left[index] = NULL_NODE;
        self.right[index] = NULL_NODE;
        self.parent[index] = NULL_NODE;
        self.mass[index] = 0;
        self.cut_dimension[index] = NULL_NODE;
        self.cut_value[index] = 0.0;
        if let Some(sums) = self.point_sum.as_mut() {
            let base = index * self.dimensions;
            sums[base..base + self.dimensions].fill(0.0);
        }
        self.free.release(index);
    }

    pub fn replace_child(&mut self, parent: usize, old_child: usize, new_child: usize) {
        if self.left[parent] == old_child {
            self.left[parent] = new_child;
        } else {
            self.right[parent] = new_child;
        }
        if self.is_internal(new_child) {
            self.parent[new_child] = parent;
        }
    }

    pub fn set_root_parent(&mut self, root: usize) {
        if self.is_internal(root) {
            self.parent[root] = NULL_NODE;
        }
    }

    /// Walks the remaining path upward after an insertion: bumps masses,
    /// folds the point into cached boxes until one already covers it, and
    /// maintains center-of-mass sums.
    pub fn ancestors_after_add(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        box_resolved: bool,
    ) -> Result<()> {
        let mut resolved = box_resolved;
        while let Some((index, _sibling)) = path.pop() {
            check_state(self.is_internal(index), "corrupt path")?;
            self.mass[index] += 1;
            self.add_to_point_sum(index, point);
            if !resolved && self.cached(index) {
                resolved = self.extend_cached_box_with_point(index, point);
            }
        }
        Ok(())
    }

    /// Walks the remaining path upward after a deletion: drops masses,
    /// shrinks cached boxes until one strictly contains the point, and
    /// maintains center-of-mass sums.
    pub fn ancestors_after_delete(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        box_resolved: bool,
        store: &PointStore,
    ) -> Result<()> {
        let mut resolved = box_resolved;
        while let Some((index, _sibling)) = path.pop() {
            check_state(self.is_internal(index), "corrupt path")?;
            self.mass[index] -= 1;
            self.subtract_from_point_sum(index, point);
            if !resolved && self.cached(index) {
                if self.strictly_contains(index, point) {
                    resolved = true;
                } else {
                    self.rebuild_cached_box(index, store)?;
                }
            }
        }
        Ok(())
    }

    /// Bounding box of the subtree rooted at `node`, from the cache when
    /// available and recomputed otherwise.
    pub fn bounding_box(&self, node: usize, store: &PointStore) -> Result<BoundingBox> {
        if self.is_leaf(node) {
            let point = store.copy(self.point_handle_of(node)?)?;
            return Ok(BoundingBox::from_point(&point));
        }
        if self.cached(node) {
            return Ok(self.cached_box(node));
        }
        let mut bounding_box = self.bounding_box(self.left[node], store)?;
        self.extend_with_subtree(&mut bounding_box, self.right[node], store)?;
        Ok(bounding_box)
    }

    /// Extends `bounding_box` with the hull of the subtree at `node`.
    pub fn extend_with_subtree(
        &self,
        bounding_box: &mut BoundingBox,
        node: usize,
        store: &PointStore,
    ) -> Result<()> {
        if self.is_leaf(node) {
            store.extend_box(self.point_handle_of(node)?, bounding_box)?;
        } else if self.cached(node) {
            let (min_values, max_values) = self.cached_box_slices(node);
            bounding_box.extend_point(min_values);
            bounding_box.extend_point(max_values);
        } else {
            self.extend_with_subtree(bounding_box, self.left[node], store)?;
            self.extend_with_subtree(bounding_box, self.right[node], store)?;
        }
        Ok(())
    }

    pub fn center_of_mass(&self, node: usize, store: &PointStore) -> Result<Vec<f32>> {
        check_argument(self.point_sum.is_some(), "center of mass not enabled")?;
        let sum = self.subtree_point_sum(node, store)?;
        let mass = self.mass(node) as f64;
        Ok(sum.iter().map(|&total| (total / mass) as f32).collect())
    }

    fn cached(&self, index: usize) -> bool {
        index < self.cache_limit
    }

    fn cached_box_slices(&self, index: usize) -> (&[f32], &[f32]) {
        let base = 2 * index * self.dimensions;
        let mid = base + self.dimensions;
        (
            &self.box_data[base..mid],
            &self.box_data[mid..mid + self.dimensions],
        )
    }

    fn cached_box(&self, index: usize) -> BoundingBox {
        let (min_values, max_values) = self.cached_box_slices(index);
        BoundingBox::from_pair(min_values, max_values).expect("cache slices share a length")
    }

    fn write_cached_box(&mut self, index: usize, bounding_box: &BoundingBox) {
        let base = 2 * index * self.dimensions;
        let mid = base + self.dimensions;
        self.box_data[base..mid].copy_from_slice(bounding_box.min_values());
        self.box_data[mid..mid + self.dimensions].copy_from_slice(bounding_box.max_values());
        self.range_sum[index] = bounding_box.range_sum();
    }

    // returns true when the cached box already covered the point
    fn extend_cached_box_with_point(&mut self, index: usize, point: &[f32]) -> bool {
        let base = 2 * index * self.dimensions;
        let mid = base + self.dimensions;
        for (lo, &v) in self.box_data[base..mid].iter_mut().zip(point) {
            if v < *lo {
                *lo = v;
            }
        }
        for (hi, &v) in self.box_data[mid..mid + self.dimensions].iter_mut().zip(point) {
            if v > *hi {
                *hi = v;
            }
        }
        let new_sum: f64 = self.box_data[base..mid]
            .iter()
            .zip(&self.box_data[mid..mid + self.dimensions])
            .map(|(&lo, &hi)| (hi - lo) as f64)
            .sum();
        let unchanged = self.range_sum[index] == new_sum;
        self.range_sum[index] = new_sum;
        unchanged
    }

    fn strictly_contains(&self, index: usize, point: &[f32]) -> bool {
        let (min_values, max_values) = self.cached_box_slices(index);
        min_values
            .iter()
            .zip(point)
            .zip(max_values)
            .all(|((&lo, &v), &hi)| lo < v && v < hi)
    }

    fn rebuild_cached_box(&mut self, index: usize, store: &PointStore) -> Result<()> {
        let mut bounding_box = self.bounding_box(self.left[index], store)?;
        self.extend_with_subtree(&mut bounding_box, self.right[index], store)?;
        self.write_cached_box(index, &bounding_box);
        Ok(())
    }

    fn subtree_point_sum(&self, node: usize, store: &PointStore) -> Result<Vec<f64>> {
        if self.is_leaf(node) {
            let mass = self.mass(node) as f64;
            let point = store.copy(self.point_handle_of(node)?)?;
            Ok(point.iter().map(|&v| v as f64 * mass).collect())
        } else {
            let sums = self.point_sum.as_ref().expect("center of mass not enabled");
            let base = node * self.dimensions;
            Ok(Vec::from(&sums[base..base + self.dimensions]))
        }
    }

    fn write_point_sum(&mut self, index: usize, sum: &[f64]) {
        if let Some(sums) = self.point_sum.as_mut() {
            let base = index * self.dimensions;
            sums[base..base + self.dimensions].copy_from_slice(sum);
        }
    }

    fn add_to_point_sum(&mut self, index: usize, point: &[f32]) {
        if let Some(sums) = self.point_sum.as_mut() {
            let base = index * self.dimensions;
            for (total, &v) in sums[base..base + self.dimensions].iter_mut().zip(point) {
                *total += v as f64;
            }
        }
    }

    fn subtract_from_point_sum(&mut self, index: usize, point: &[f32]) {
        if let Some(sums) = self.point_sum.as_mut() {
            let base = index * self.dimensions;
            for (total, &v) in sums[base..base + self.dimensions].iter_mut().zip(point) {
                *total -= v as f64;
            }
        }
    }

    /// Recursive structural check: masses sum, cuts partition the leaves
    /// and cached boxes match the hulls they claim to cache. Returns the
    /// subtree's mass and recomputed hull.
    pub fn validate_subtree(
        &self,
        node: usize,
        store: &PointStore,
    ) -> Result<(usize, BoundingBox)> {
        if self.is_leaf(node) {
            let point = store.copy(self.point_handle_of(node)?)?;
            return Ok((self.mass(node), BoundingBox::from_point(&point)));
        }
        let (left_mass, left_box) = self.validate_subtree(self.left[node], store)?;
        let (right_mass, right_box) = self.validate_subtree(self.right[node], store)?;
        let dimension = self.cut_dimension[node];
        let value = self.cut_value[node];
        check_state(
            left_box.max_values()[dimension] <= value,
            "left subtree crosses the cut",
        )?;
        check_state(
            right_box.min_values()[dimension] > value,
            "right subtree crosses the cut",
        )?;
        check_state(
            self.mass[node] == left_mass + right_mass,
            "node mass does not match its children",
        )?;
        let mut hull = left_box;
        hull.extend_box(&right_box);
        if self.cached(node) {
            let cached = self.cached_box(node);
            for d in 0..self.dimensions {
                check_state(
                    cached.min_values()[d] == hull.min_values()[d]
                        && cached.max_values()[d] == hull.max_values()[d],
                    "cached bounding box is stale",
                )?;
            }
        }
        Ok((self.mass[node], hull))
    }
}
