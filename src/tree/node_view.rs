use crate::store::points::PointStore;
use crate::tree::bounding_box::BoundingBox;
use crate::tree::node_store::NodeStore;
use crate::errors::Result;

/// Traversal cursor handed to visitors.
///
/// On the way down it only tracks position and depth; on the way up it
/// grows the bounding box of the subtree below the current node (starting
/// from the leaf) and exposes the probability that a random cut would
/// separate the query from that box. A visitor that ignores the leaf it
/// landed on (duplicate damping) can request a shadow box that excludes
/// the traversal leaf.
pub struct NodeView {
    node: usize,
    depth: usize,
    mass: usize,
    tree_mass: usize,
    leaf_handle: usize,
    leaf_point: Vec<f32>,
    leaf_duplicate: bool,
    leaf_sequences: Vec<u64>,
    probability_of_cut: f64,
    current_box: Option<BoundingBox>,
    shadow_box: Option<BoundingBox>,
    use_shadow_box: bool,
    shadow_probability: f64,
}

impl NodeView {
    pub(crate) fn new(root: usize, tree_mass: usize) -> Self {
        NodeView {
            node: root,
            depth: 0,
            mass: tree_mass,
            tree_mass,
            leaf_handle: usize::MAX,
            leaf_point: Vec::new(),
            leaf_duplicate: false,
            leaf_sequences: Vec::new(),
            probability_of_cut: f64::MAX,
            current_box: None,
            shadow_box: None,
            use_shadow_box: false,
            shadow_probability: f64::MAX,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn mass(&self) -> usize {
        self.mass
    }

    pub fn tree_mass(&self) -> usize {
        self.tree_mass
    }

    pub fn leaf_handle(&self) -> usize {
        self.leaf_handle
    }

    pub fn leaf_point(&self) -> &[f32] {
        &self.leaf_point
    }

    pub fn is_duplicate(&self) -> bool {
        self.leaf_duplicate
    }

    pub fn leaf_sequences(&self) -> &[u64] {
        &self.leaf_sequences
    }

    pub fn probability_of_cut(&self) -> f64 {
        self.probability_of_cut
    }

    pub fn shadow_probability_of_cut(&self) -> f64 {
        self.shadow_probability
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        self.current_box.as_ref()
    }

    pub fn shadow_bounding_box(&self) -> Option<&BoundingBox> {
        self.shadow_box.as_ref()
    }

    pub(crate) fn node(&self) -> usize {
        self.node
    }

    pub(crate) fn descend(&mut self, point: &[f32], nodes: &NodeStore) {
        self.node = if nodes.is_left_of(self.node, point) {
            nodes.left(self.node)
        } else {
            nodes.right(self.node)
        };
        self.depth += 1;
    }

    pub(crate) fn descend_to(&mut self, node: usize) {
        self.node = node;
        self.depth += 1;
    }

    pub(crate) fn move_to_sibling(&mut self, node: usize) {
        self.node = node;
    }

    pub(crate) fn visit_leaf(
        &mut self,
        point: &[f32],
        node: usize,
        nodes: &NodeStore,
        store: &PointStore,
    ) -> Result<()> {
        self.node = node;
        self.leaf_handle = nodes.point_handle_of(node)?;
        self.mass = nodes.mass(node);
        self.leaf_point = store.copy(self.leaf_handle)?;
        self.leaf_duplicate = self.leaf_point == point;
        self.probability_of_cut = if self.leaf_duplicate { 0.0 } else { 1.0 };
        self.leaf_sequences = nodes.leaf_sequences(self.leaf_handle);
        self.current_box = Some(BoundingBox::from_point(&self.leaf_point));
        Ok(())
    }

    pub(crate) fn ascend(
        &mut self,
        point: &[f32],
        parent: usize,
        nodes: &NodeStore,
        store: &PointStore,
    ) -> Result<()> {
        self.extend_with_sibling(parent, nodes, store)?;
        let current = self
            .current_box
            .as_ref()
            .expect("box exists after a leaf visit");
        self.probability_of_cut = current.probability_of_cut(point);
        if self.use_shadow_box {
            self.shadow_probability = self
                .shadow_box
                .as_ref()
                .expect("shadow box exists after the first ascent")
                .probability_of_cut(point);
        }
        self.node = parent;
        self.mass = nodes.mass(parent);
        self.depth -= 1;
        Ok(())
    }

    pub(crate) fn ascend_masked(
        &mut self,
        point: &[f32],
        missing: &[bool],
        parent: usize,
        nodes: &NodeStore,
        store: &PointStore,
    ) -> Result<()> {
        self.extend_with_sibling(parent, nodes, store)?;
        let current = self
            .current_box
            .as_ref()
            .expect("box exists after a leaf visit");
        self.probability_of_cut = current.probability_of_cut_masked(point, missing);
        self.node = parent;
        self.mass = nodes.mass(parent);
        self.depth -= 1;
        Ok(())
    }

    /// Folds the saved box of an already-explored branch into this view
    /// and steps up to the parent of the two branches.
    pub(crate) fn merge_branches(
        &mut self,
        point: &[f32],
        missing: &[bool],
        parent: usize,
        saved_box: Option<BoundingBox>,
        nodes: &NodeStore,
    ) -> Result<()> {
        if let (Some(current), Some(saved)) = (self.current_box.as_mut(), saved_box.as_ref()) {
            current.extend_box(saved);
        }
        let current = self
            .current_box
            .as_ref()
            .expect("box exists after a leaf visit");
        self.probability_of_cut = current.probability_of_cut_masked(point, missing);
        self.node = parent;
        self.mass = nodes.mass(parent);
        self.depth -= 1;
        Ok(())
    }

    pub(crate) fn box_snapshot(&self) -> Option<BoundingBox> {
        self.current_box.clone()
    }

    /// The shadow box excludes the traversal leaf; it starts materializing
    /// at the next ascent.
    pub(crate) fn enable_shadow_box(&mut self) {
        self.use_shadow_box = true;
    }

    fn extend_with_sibling(
        &mut self,
        parent: usize,
        nodes: &NodeStore,
        store: &PointStore,
    ) -> Result<()> {
        let sibling = nodes.sibling(self.node, parent);
        let current = self
            .current_box
            .as_mut()
            .expect("box exists after a leaf visit");
        if self.use_shadow_box {
            let sibling_box = nodes.bounding_box(sibling, store)?;
            current.extend_box(&sibling_box);
            match self.shadow_box.as_mut() {
                Some(shadow) => shadow.extend_box(&sibling_box),
                None => self.shadow_box = Some(sibling_box),
            }
        } else {
            nodes.extend_with_subtree(current, sibling, store)?;
        }
        Ok(())
    }
}
