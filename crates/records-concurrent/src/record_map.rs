use std::collections::BTreeMap;
use std::mem;

use parking_lot::Mutex;
use records_core::{
    FxBuildHasher, FxHashMap, MemoryCategory, RamDomain, Record, RecordConfig, RecordError,
    RecordTable, Result, Shape, MEMORY_TRACKER,
};

use tracing::debug;

use crate::block_store::BlockStore;

/// Handle of the only record of the zero-arity shape.
pub const UNIT_HANDLE: RamDomain = 1;

/// Type-erased view of a table, used by the registry to export every shape.
pub trait RecordSource: Send + Sync {
    fn shape(&self) -> Shape;

    /// Number of handles issued.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds every (handle, fields) pair known to this table.
    fn export_into(&self, table: &mut RecordTable);
}

/// Bidirectional mapping between records of one shape and dense handles.
///
/// Handles start at 1 and are assigned in insertion order; 0 is never issued.
/// `pack` serializes on a per-table lock covering both the forward lookup and
/// the reverse-index write. `unpack` never locks.
///
/// Ordering: a handle may be dereferenced by any thread once the `pack` call
/// that issued it has returned and that return happens-before the dereference
/// (normally through the caller's own data flow). `unpack` checks this
/// against the published length; `unpack_unchecked` trusts the caller.
pub struct RecordMap<R: Record> {
    shape: Shape,
    index: Mutex<FxHashMap<R, RamDomain>>,
    records: BlockStore<R>,
    unit: Option<R>,
}

impl<R: Record> RecordMap<R> {
    pub fn new(config: &RecordConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_validated(config))
    }

    pub(crate) fn with_validated(config: &RecordConfig) -> Self {
        let unit = if R::ARITY == 0 {
            R::from_fields(&[]).ok()
        } else {
            None
        };
        let capacity = if unit.is_some() { 0 } else { config.max_records };
        Self {
            shape: Shape::of::<R>(),
            index: Mutex::new(FxHashMap::with_hasher(FxBuildHasher::default())),
            records: BlockStore::new(config.block_size, capacity),
            unit,
        }
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.records.block_size()
    }

    /// Number of handles issued; every handle in `1..=len()` is valid.
    #[inline]
    pub fn len(&self) -> usize {
        if self.unit.is_some() {
            1
        } else {
            self.records.len()
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the handle of `record`, interning it if it is new.
    ///
    /// Panics when the shape has issued `max_records` handles.
    pub fn pack(&self, record: &R) -> RamDomain {
        if self.unit.is_some() {
            return UNIT_HANDLE;
        }

        let mut index = self.index.lock();
        if let Some(&handle) = index.get(record) {
            return handle;
        }

        let issued = self.records.len();
        if issued >= self.records.capacity() {
            panic!(
                "{}",
                RecordError::Exhausted {
                    shape: self.shape.name,
                    capacity: self.records.capacity(),
                }
            );
        }
        // 0 is the null handle
        let handle = (issued + 1) as RamDomain;
        debug_assert_ne!(handle, RamDomain::MAX);

        // SAFETY: pushes are serialized by the index lock
        let slot = unsafe { self.records.push_exclusive(record.clone()) };
        debug_assert_eq!(slot, issued);

        let before = index.capacity();
        index.insert(record.clone(), handle);
        let grown = index.capacity() - before;
        drop(index);

        // Accounting goes through a global lock, so it waits until the table
        // lock is released.
        if slot % self.records.block_size() == 0 {
            let slots = self.records.block_size();
            MEMORY_TRACKER.record_alloc(
                MemoryCategory::RecordBlocks,
                slots as u64,
                self.records.block_bytes() as u64,
            );
            debug!(shape = %self.shape, block = slot / slots, slots, "allocated record block");
        }
        if grown > 0 {
            let entry = mem::size_of::<(R, RamDomain)>();
            MEMORY_TRACKER.record_alloc(
                MemoryCategory::ForwardMap,
                grown as u64,
                (grown * entry) as u64,
            );
        }

        handle
    }

    /// Dereferences a handle issued by `pack`.
    ///
    /// Panics if `handle` was never issued for this shape. A zero-arity shape
    /// has a single value, so any handle yields it; `try_unpack` and `get`
    /// still accept only `UNIT_HANDLE`.
    #[inline]
    pub fn unpack(&self, handle: RamDomain) -> &R {
        if let Some(unit) = &self.unit {
            return unit;
        }
        match self.try_unpack(handle) {
            Ok(record) => record,
            Err(e) => panic!("{e}"),
        }
    }

    /// Dereferences a handle without validating it.
    ///
    /// # Safety
    ///
    /// `handle` must have been returned by `pack` on this table, and that
    /// `pack` must happen-before this call.
    #[inline]
    pub unsafe fn unpack_unchecked(&self, handle: RamDomain) -> &R {
        if let Some(unit) = &self.unit {
            return unit;
        }
        debug_assert!(handle > 0, "null or negative handle {handle}");
        unsafe { self.records.get_unchecked((handle - 1) as usize) }
    }

    pub fn try_unpack(&self, handle: RamDomain) -> Result<&R> {
        self.get(handle).ok_or_else(|| RecordError::InvalidHandle {
            shape: self.shape.name,
            handle,
            issued: self.len(),
        })
    }

    #[inline]
    pub fn get(&self, handle: RamDomain) -> Option<&R> {
        if let Some(unit) = &self.unit {
            return (handle == UNIT_HANDLE).then_some(unit);
        }
        if handle <= 0 {
            return None;
        }
        self.records.get((handle - 1) as usize)
    }

    /// Handle-to-fields mapping of every record interned so far.
    pub fn record_references(&self) -> BTreeMap<RamDomain, Vec<RamDomain>> {
        self.iter()
            .map(|(handle, record)| (handle, record.fields().to_vec()))
            .collect()
    }

    /// Iterates (handle, record) pairs in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (RamDomain, &R)> + '_ {
        let unit = self.unit.iter().map(|u| (UNIT_HANDLE, u));
        let records = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| ((i + 1) as RamDomain, r));
        unit.chain(records)
    }
}

impl<R: Record> Drop for RecordMap<R> {
    fn drop(&mut self) {
        let blocks = self.records.allocated_blocks();
        if blocks > 0 {
            MEMORY_TRACKER.record_free(
                MemoryCategory::RecordBlocks,
                (blocks * self.records.block_size()) as u64,
                (blocks * self.records.block_bytes()) as u64,
            );
        }
        let entries = self.index.get_mut().capacity();
        if entries > 0 {
            MEMORY_TRACKER.record_free(
                MemoryCategory::ForwardMap,
                entries as u64,
                (entries * mem::size_of::<(R, RamDomain)>()) as u64,
            );
        }
    }
}

impl<R: Record> RecordSource for RecordMap<R> {
    fn shape(&self) -> Shape {
        self.shape
    }

    fn len(&self) -> usize {
        RecordMap::len(self)
    }

    fn export_into(&self, table: &mut RecordTable) {
        for (handle, record) in self.iter() {
            table.add_record(self.shape, handle, record.fields());
        }
    }
}
