use crate::sampler::{ReservoirSampler, SamplerState, NO_POINT};
use crate::store::points::PointStore;
use crate::tree::tree::{RandomCutTree, TreeState};
use crate::visitor::{MultiVisitor, Visitor};
use crate::errors::Result;

/// One sampler and the tree it feeds. The pair owns all of its mutable
/// state, which is what makes per-tree update fan-out safe.
pub struct SampledTree {
    pub(crate) sampler: ReservoirSampler,
    pub(crate) tree: RandomCutTree,
    pub(crate) query_seed: u64,
}

impl SampledTree {
    pub fn new(
        dimensions: usize,
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass: bool,
        random_seed: u64,
        query_seed: u64,
    ) -> Result<Self> {
        Ok(SampledTree {
            sampler: ReservoirSampler::new(
                capacity,
                time_decay,
                initial_accept_fraction,
                random_seed,
            )?,
            tree: RandomCutTree::new(
                dimensions,
                capacity,
                bounding_box_cache_fraction,
                store_sequence_indexes,
                center_of_mass,
                random_seed.wrapping_add(1),
            )?,
            query_seed,
        })
    }

    /// Offers the point at `sequence_index`. On acceptance the evicted
    /// sample (if any) leaves the tree before the point enters, keeping
    /// the leaf count within capacity. Returns the (inserted, deleted)
    /// handles for the store's batched reference-count adjustment;
    /// `usize::MAX` marks an absent side.
    pub fn update(
        &mut self,
        point_handle: usize,
        sequence_index: u64,
        store: &PointStore,
    ) -> Result<(usize, usize)> {
        if !self.sampler.accept_point(sequence_index) {
            return Ok((NO_POINT, NO_POINT));
        }
        let deleted = match self.sampler.take_evicted() {
            Some(evicted) => self
                .tree
                .delete(evicted.point_index, evicted.sequence_index, store)?,
            None => NO_POINT,
        };
        let inserted = self.tree.add(point_handle, sequence_index, store)?;
        self.sampler.add_point(inserted)?;
        Ok((inserted, deleted))
    }

    pub fn traverse<V: Visitor>(
        &self,
        point: &[f32],
        store: &PointStore,
        visitor: &mut V,
    ) -> Result<bool> {
        self.tree.traverse(point, store, visitor)
    }

    pub fn traverse_multi<V: MultiVisitor>(
        &self,
        point: &[f32],
        missing: &[bool],
        store: &PointStore,
        visitor: &mut V,
    ) -> Result<bool> {
        self.tree.traverse_multi(point, missing, store, visitor)
    }

    pub fn tree(&self) -> &RandomCutTree {
        &self.tree
    }

    pub fn sampler(&self) -> &ReservoirSampler {
        &self.sampler
    }

    pub fn query_seed(&self) -> u64 {
        self.query_seed
    }
}

/// Plain captured state of a sampler+tree pair.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampledTreeState {
    pub sampler: SamplerState,
    pub tree: TreeState,
    pub query_seed: u64,
}

impl SampledTree {
    pub fn to_state(&self) -> SampledTreeState {
        SampledTreeState {
            sampler: self.sampler.to_state(),
            tree: self.tree.to_state(),
            query_seed: self.query_seed,
        }
    }

    pub fn from_state(state: SampledTreeState) -> Result<Self> {
        Ok(SampledTree {
            sampler: ReservoirSampler::from_state(state.sampler)?,
            tree: RandomCutTree::from_state(state.tree)?,
            query_seed: state.query_seed,
        })
    }
}
