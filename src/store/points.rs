use crate::config::Precision;
use crate::errors::{RcfError, Result};
use crate::store::intervals::IntervalManager;
use crate::tree::bounding_box::BoundingBox;
use crate::util::{check_argument, check_state};

pub(crate) const NULL_HANDLE: usize = usize::MAX;

/// Packed element storage; the precision mode selects the element width,
/// the API speaks `f32` in both modes.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub(crate) enum PointBuffer {
    Single(Vec<f32>),
    Double(Vec<f64>),
}

impl PointBuffer {
    fn new(precision: Precision, initial: usize) -> Self {
        match precision {
            Precision::Single => PointBuffer::Single(vec![0.0; initial]),
            Precision::Double => PointBuffer::Double(vec![0.0; initial]),
        }
    }

    fn len(&self) -> usize {
        match self {
            PointBuffer::Single(v) => v.len(),
            PointBuffer::Double(v) => v.len(),
        }
    }

    fn resize(&mut self, new_len: usize) {
        match self {
            PointBuffer::Single(v) => v.resize(new_len, 0.0),
            PointBuffer::Double(v) => v.resize(new_len, 0.0),
        }
    }

    fn write(&mut self, offset: usize, values: &[f32]) {
        match self {
            PointBuffer::Single(v) => v[offset..offset + values.len()].copy_from_slice(values),
            PointBuffer::Double(v) => {
                for (slot, &value) in v[offset..offset + values.len()].iter_mut().zip(values) {
                    *slot = value as f64;
                }
            }
        }
    }

    fn copy_out(&self, offset: usize, len: usize) -> Vec<f32> {
        match self {
            PointBuffer::Single(v) => Vec::from(&v[offset..offset + len]),
            PointBuffer::Double(v) => v[offset..offset + len].iter().map(|&x| x as f32).collect(),
        }
    }

    fn equals(&self, offset: usize, values: &[f32]) -> bool {
        match self {
            PointBuffer::Single(v) => &v[offset..offset + values.len()] == values,
            PointBuffer::Double(v) => v[offset..offset + values.len()]
                .iter()
                .zip(values)
                .all(|(&stored, &value)| stored as f32 == value),
        }
    }

    // src >= dst, so a forward copy is safe for overlapping ranges
    fn move_range(&mut self, src: usize, dst: usize, len: usize) {
        match self {
            PointBuffer::Single(v) => v.copy_within(src..src + len, dst),
            PointBuffer::Double(v) => v.copy_within(src..src + len, dst),
        }
    }
}

/// Reference-counted storage for the tree-space points shared by every
/// tree in a forest.
///
/// Each handle maps to a start offset (in units of the input width) into
/// the packed buffer. With internal shingling enabled, an added point
/// whose leading `dimensions - input_width` elements match the tail of
/// the buffer shares that window and appends only its newest block, so
/// consecutive shingles cost one block each. The alternative
/// `direct_location_map` mode gives every handle the fixed offset
/// `handle * dimensions` and never compacts.
pub struct PointStore {
    pub(crate) dimensions: usize,
    pub(crate) shingle_size: usize,
    pub(crate) capacity: usize,
    pub(crate) internal_shingling: bool,
    pub(crate) direct_location_map: bool,
    pub(crate) buffer: PointBuffer,
    pub(crate) location: Vec<usize>,
    pub(crate) reference_count: Vec<u32>,
    pub(crate) start_free_region: usize,
    pub(crate) index_manager: IntervalManager,
}

impl PointStore {
    pub fn new(
        dimensions: usize,
        shingle_size: usize,
        capacity: usize,
        initial_capacity: usize,
        internal_shingling: bool,
        direct_location_map: bool,
        precision: Precision,
    ) -> Result<Self> {
        check_argument(dimensions > 0, "dimensions must be positive")?;
        check_argument(
            shingle_size > 0 && dimensions % shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_argument(capacity > 0, "capacity must be positive")?;
        let initial = initial_capacity.clamp(1, capacity);
        let (buffer_len, handle_len) = if direct_location_map {
            (capacity * dimensions, capacity)
        } else {
            (initial * dimensions, initial)
        };
        Ok(PointStore {
            dimensions,
            shingle_size,
            capacity,
            internal_shingling,
            direct_location_map,
            buffer: PointBuffer::new(precision, buffer_len),
            location: vec![NULL_HANDLE; handle_len],
            reference_count: vec![0; handle_len],
            start_free_region: 0,
            index_manager: IntervalManager::new(handle_len),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn input_width(&self) -> usize {
        self.dimensions / self.shingle_size
    }

    /// Stores a tree-space point and returns its handle with a reference
    /// count of one.
    pub fn add(&mut self, point: &[f32]) -> Result<usize> {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        self.ensure_handle_capacity()?;
        if !self.direct_location_map {
            self.ensure_buffer_capacity()?;
        }
        let handle = self.index_manager.get()?;
        check_state(self.reference_count[handle] == 0, "allocated handle in use")?;

        let base = self.input_width();
        if self.direct_location_map {
            self.location[handle] = handle * self.shingle_size;
            self.buffer.write(handle * self.dimensions, point);
        } else if self.shares_window(point) {
            let extra = self.dimensions - base;
            let index = self.start_free_region;
            self.location[handle] = (index - extra) / base;
            self.buffer.write(index, &point[extra..]);
            self.start_free_region += base;
        } else {
            let index = self.start_free_region;
            self.location[handle] = index / base;
            self.buffer.write(index, point);
            self.start_free_region += self.dimensions;
        }
        self.reference_count[handle] = 1;
        Ok(handle)
    }

    pub fn increment(&mut self, handle: usize) -> Result<()> {
        check_argument(handle < self.reference_count.len(), "handle out of range")?;
        check_state(
            self.reference_count[handle] > 0,
            "increment of a free handle",
        )?;
        self.reference_count[handle] += 1;
        Ok(())
    }

    pub fn decrement(&mut self, handle: usize) -> Result<()> {
        check_argument(handle < self.reference_count.len(), "handle out of range")?;
        check_state(
            self.reference_count[handle] > 0,
            "decrement of a free handle",
        )?;
        self.reference_count[handle] -= 1;
        if self.reference_count[handle] == 0 {
            self.location[handle] = NULL_HANDLE;
            self.index_manager.release(handle);
        }
        Ok(())
    }

    /// Applies the per-tree (inserted, deleted) handle pairs produced by
    /// one forest update. `usize::MAX` marks an absent side.
    pub fn adjust(&mut self, results: &[(usize, usize)]) -> Result<()> {
        for &(inserted, deleted) in results {
            if inserted != NULL_HANDLE {
                self.increment(inserted)?;
                if deleted != NULL_HANDLE {
                    self.decrement(deleted)?;
                }
            }
        }
        Ok(())
    }

    pub fn copy(&self, handle: usize) -> Result<Vec<f32>> {
        let offset = self.offset_of(handle)?;
        Ok(self.buffer.copy_out(offset, self.dimensions))
    }

    pub fn is_equal(&self, point: &[f32], handle: usize) -> Result<bool> {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        let offset = self.offset_of(handle)?;
        Ok(self.buffer.equals(offset, point))
    }

    /// Runs `f` on a borrowed view of the stored point where the element
    /// width allows it, otherwise on a widened copy.
    pub fn with_point<R>(&self, handle: usize, f: impl FnOnce(&[f32]) -> R) -> Result<R> {
        let offset = self.offset_of(handle)?;
        match &self.buffer {
            PointBuffer::Single(v) => Ok(f(&v[offset..offset + self.dimensions])),
            PointBuffer::Double(_) => {
                let copy = self.buffer.copy_out(offset, self.dimensions);
                Ok(f(&copy))
            }
        }
    }

    pub fn extend_box(&self, handle: usize, bounding_box: &mut BoundingBox) -> Result<()> {
        self.with_point(handle, |point| {
            bounding_box.extend_point(point);
        })
    }

    /// Copies live windows into a contiguous prefix and returns the
    /// `(handle, new_offset)` pairs that were applied. Handles themselves
    /// stay stable.
    pub fn compact(&mut self) -> Result<Vec<(usize, usize)>> {
        if self.direct_location_map {
            return Ok(Vec::new());
        }
        let base = self.input_width();
        let mut live: Vec<(usize, usize)> = self
            .location
            .iter()
            .enumerate()
            .filter(|(_, &loc)| loc != NULL_HANDLE)
            .map(|(handle, &loc)| (loc, handle))
            .collect();
        live.sort_unstable();

        let mut moves = Vec::new();
        let mut fresh = 0usize;
        let mut i = 0usize;
        while i < live.len() {
            let block_start = live[i].0 * base;
            let mut block_end = block_start + self.dimensions;
            let mut j = i + 1;
            while j < live.len() && live[j].0 * base <= block_end {
                let end = live[j].0 * base + self.dimensions;
                if end > block_end {
                    block_end = end;
                }
                j += 1;
            }
            check_state(fresh <= block_start, "compaction would move data right")?;
            if fresh != block_start {
                self.buffer.move_range(block_start, fresh, block_end - block_start);
                for &(loc, handle) in &live[i..j] {
                    let new_loc = (fresh + (loc * base - block_start)) / base;
                    self.location[handle] = new_loc;
                    moves.push((handle, new_loc));
                }
            }
            fresh += block_end - block_start;
            i = j;
        }
        self.start_free_region = fresh;
        Ok(moves)
    }

    /// Total outstanding references, matching the sum of tree masses.
    pub fn active_references(&self) -> usize {
        self.reference_count.iter().map(|&c| c as usize).sum()
    }

    pub fn used_handles(&self) -> usize {
        self.index_manager.used()
    }

    fn offset_of(&self, handle: usize) -> Result<usize> {
        check_argument(handle < self.location.len(), "handle out of range")?;
        check_state(self.reference_count[handle] > 0, "handle not in use")?;
        Ok(self.location[handle] * self.input_width())
    }

    // successive shingles share all but one block; detect that by
    // comparing the incoming prefix against the buffer tail
    fn shares_window(&self, point: &[f32]) -> bool {
        if !self.internal_shingling || self.shingle_size == 1 {
            return false;
        }
        let extra = self.dimensions - self.input_width();
        if self.start_free_region < extra
            || self.start_free_region + self.input_width() > self.buffer.len()
        {
            return false;
        }
        self.buffer
            .equals(self.start_free_region - extra, &point[..extra])
    }

    fn ensure_handle_capacity(&mut self) -> Result<()> {
        if self.index_manager.is_empty() && !self.direct_location_map {
            let current = self.location.len();
            if current < self.capacity {
                let grown = (current + 1 + current / 5).min(self.capacity);
                self.location.resize(grown, NULL_HANDLE);
                self.reference_count.resize(grown, 0);
                self.index_manager.change_capacity(grown);
            }
        }
        Ok(())
    }

    fn ensure_buffer_capacity(&mut self) -> Result<()> {
        if self.start_free_region + self.dimensions > self.buffer.len() {
            self.compact()?;
        }
        let needed = self.start_free_region + self.dimensions;
        if needed > self.buffer.len() {
            let limit = self.capacity * self.dimensions;
            check_argument(needed <= limit, "point store capacity exceeded")?;
            let grown = (self.buffer.len() + self.buffer.len() / 5)
                .max(needed)
                .min(limit);
            self.buffer.resize(grown);
        }
        Ok(())
    }
}

/// Plain captured state of a point store.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointStoreState {
    pub dimensions: usize,
    pub shingle_size: usize,
    pub capacity: usize,
    pub internal_shingling: bool,
    pub direct_location_map: bool,
    pub(crate) buffer: PointBuffer,
    pub location: Vec<usize>,
    pub reference_count: Vec<u32>,
    pub start_free_region: usize,
    pub(crate) index_manager: IntervalManager,
}

impl PointStore {
    pub fn to_state(&self) -> PointStoreState {
        PointStoreState {
            dimensions: self.dimensions,
            shingle_size: self.shingle_size,
            capacity: self.capacity,
            internal_shingling: self.internal_shingling,
            direct_location_map: self.direct_location_map,
            buffer: self.buffer.clone(),
            location: self.location.clone(),
            reference_count: self.reference_count.clone(),
            start_free_region: self.start_free_region,
            index_manager: self.index_manager.clone(),
        }
    }

    pub fn from_state(state: PointStoreState) -> Result<Self> {
        check_argument(
            state.location.len() == state.reference_count.len(),
            "mismatched state arrays",
        )?;
        Ok(PointStore {
            dimensions: state.dimensions,
            shingle_size: state.shingle_size,
            capacity: state.capacity,
            internal_shingling: state.internal_shingling,
            direct_location_map: state.direct_location_map,
            buffer: state.buffer,
            location: state.location,
            reference_count: state.reference_count,
            start_free_region: state.start_free_region,
            index_manager: state.index_manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dimensions: usize, shingle_size: usize) -> PointStore {
        PointStore::new(
            dimensions,
            shingle_size,
            64,
            4,
            shingle_size > 1,
            false,
            Precision::Single,
        )
        .unwrap()
    }

    #[test]
    fn add_and_read_back() {
        let mut store = store(3, 1);
        let a = store.add(&[1.0, 2.0, 3.0]).unwrap();
        let b = store.add(&[4.0, 5.0, 6.0]).unwrap();
        assert_eq!(store.copy(a).unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(store.is_equal(&[4.0, 5.0, 6.0], b).unwrap());
        assert_eq!(store.active_references(), 2);
    }

    #[test]
    fn overlapping_shingles_share_storage() {
        let mut store = store(4, 4);
        store.add(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let before = store.start_free_region;
        let b = store.add(&[2.0, 3.0, 4.0, 5.0]).unwrap();
        // only one new block of width 1 was written
        assert_eq!(store.start_free_region, before + 1);
        assert_eq!(store.copy(b).unwrap(), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn decrement_to_zero_frees_and_double_free_is_fatal() {
        let mut store = store(2, 1);
        let a = store.add(&[1.0, 2.0]).unwrap();
        store.increment(a).unwrap();
        store.decrement(a).unwrap();
        store.decrement(a).unwrap();
        assert!(matches!(
            store.decrement(a),
            Err(RcfError::InvariantViolation { .. })
        ));
        assert!(store.copy(a).is_err());
    }

    #[test]
    fn compaction_preserves_content() {
        let mut store = store(2, 1);
        let handles: Vec<usize> = (0..8)
            .map(|i| store.add(&[i as f32, -(i as f32)]).unwrap())
            .collect();
        for &h in &handles[..4] {
            store.decrement(h).unwrap();
        }
        let moves = store.compact().unwrap();
        assert!(!moves.is_empty());
        for (i, &h) in handles[4..].iter().enumerate() {
            let expected = (i + 4) as f32;
            assert_eq!(store.copy(h).unwrap(), vec![expected, -expected]);
        }
        assert_eq!(store.start_free_region, 8);
    }

    #[test]
    fn direct_location_map_is_stable() {
        let mut store =
            PointStore::new(2, 1, 8, 8, false, true, Precision::Single).unwrap();
        let a = store.add(&[1.0, 2.0]).unwrap();
        assert!(store.compact().unwrap().is_empty());
        assert_eq!(store.copy(a).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn double_precision_round_trips_f32() {
        let mut store =
            PointStore::new(2, 1, 8, 8, false, false, Precision::Double).unwrap();
        let a = store.add(&[1.25, -3.5]).unwrap();
        assert_eq!(store.copy(a).unwrap(), vec![1.25, -3.5]);
        assert!(store.is_equal(&[1.25, -3.5], a).unwrap());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut store = PointStore::new(2, 1, 2, 2, false, false, Precision::Single).unwrap();
        store.add(&[0.0, 0.0]).unwrap();
        store.add(&[1.0, 1.0]).unwrap();
        assert!(store.add(&[2.0, 2.0]).is_err());
    }
}
