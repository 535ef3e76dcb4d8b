use core::cell::UnsafeCell;
use core::mem::{self, MaybeUninit};
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;

type Slot<T> = UnsafeCell<MaybeUninit<T>>;

/// Append-only store of fixed-capacity blocks.
///
/// - Blocks are allocated on demand and never resized, moved or freed before
///   the store itself is dropped, so `&T` handed out by `get` stays valid.
/// - The block directory is sized once from the capacity, so reading it never
///   races a reallocation.
/// - Writers must be serialized externally (see `push_exclusive`); readers are
///   lock-free and see exactly the prefix published through `len`.
pub struct BlockStore<T> {
    shift: u32,
    mask: usize,
    capacity: usize,
    blocks: Box<[AtomicPtr<Slot<T>>]>,
    len: CachePadded<AtomicUsize>,
}

// Safety: slots are written once by the serialized writer and only read after
// publication through `len` (Release/Acquire).
unsafe impl<T: Send> Send for BlockStore<T> {}
unsafe impl<T: Send + Sync> Sync for BlockStore<T> {}

impl<T> BlockStore<T> {
    /// `block_size` must be a power of two.
    pub fn new(block_size: usize, capacity: usize) -> Self {
        assert!(
            block_size.is_power_of_two(),
            "block size must be a power of two"
        );
        let blocks = (0..capacity.div_ceil(block_size))
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shift: block_size.trailing_zeros(),
            mask: block_size - 1,
            capacity,
            blocks,
            len: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of published slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of blocks allocated so far.
    pub fn allocated_blocks(&self) -> usize {
        self.blocks
            .iter()
            .take_while(|b| !b.load(Ordering::Acquire).is_null())
            .count()
    }

    fn alloc_block(&self, block: usize) -> *mut Slot<T> {
        let size = self.block_size();
        let mut vec: Vec<Slot<T>> = Vec::with_capacity(size);
        vec.resize_with(size, || UnsafeCell::new(MaybeUninit::uninit()));
        let raw = Box::into_raw(vec.into_boxed_slice()).cast::<Slot<T>>();
        self.blocks[block].store(raw, Ordering::Release);
        raw
    }

    /// Bytes taken by one block.
    pub fn block_bytes(&self) -> usize {
        self.block_size() * mem::size_of::<T>()
    }

    /// Appends `value` and returns its index. An index that is a multiple of
    /// the block size started a new block.
    ///
    /// # Safety
    ///
    /// Calls must not overlap: the caller holds the lock that owns this store
    /// for writing.
    pub unsafe fn push_exclusive(&self, value: T) -> usize {
        let index = self.len.load(Ordering::Relaxed);
        assert!(index < self.capacity, "block store is full");
        let block = index >> self.shift;
        let mut base = self.blocks[block].load(Ordering::Acquire);
        if base.is_null() {
            base = self.alloc_block(block);
        }
        // SAFETY: `index & mask` is inside the block and the slot is unpublished,
        // so no reader can observe it yet.
        unsafe { (*UnsafeCell::raw_get(base.add(index & self.mask))).write(value) };
        self.len.store(index + 1, Ordering::Release);
        index
    }

    /// Checked access to a published slot.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index < self.len() {
            // SAFETY: bounds checked against the published length
            Some(unsafe { self.get_unchecked(index) })
        } else {
            None
        }
    }

    /// Unchecked access.
    ///
    /// # Safety
    ///
    /// `index` must be below a length this thread has already observed, or
    /// the push that wrote it must happen-before this call.
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        debug_assert!(index < self.len(), "index {index} not published");
        unsafe {
            let base = self
                .blocks
                .get_unchecked(index >> self.shift)
                .load(Ordering::Acquire);
            (*UnsafeCell::raw_get(base.add(index & self.mask))).assume_init_ref()
        }
    }

    /// Iterates the published prefix in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let len = self.len();
        // SAFETY: every index below an observed length is published
        (0..len).map(move |i| unsafe { self.get_unchecked(i) })
    }
}

impl<T> Drop for BlockStore<T> {
    fn drop(&mut self) {
        let len = *self.len.get_mut();
        let size = self.block_size();
        for (block, entry) in self.blocks.iter_mut().enumerate() {
            let base = *entry.get_mut();
            if base.is_null() {
                break;
            }
            let start = block * size;
            let live = len.saturating_sub(start).min(size);
            unsafe {
                for i in 0..live {
                    (*UnsafeCell::raw_get(base.add(i))).assume_init_drop();
                }
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(base, size)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn push(store: &BlockStore<u64>, v: u64) -> usize {
        unsafe { store.push_exclusive(v) }
    }

    #[test]
    fn spans_block_boundaries() {
        let store = BlockStore::new(4, 64);
        for v in 0..10u64 {
            assert_eq!(push(&store, v * 10), v as usize);
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.allocated_blocks(), 3);
        assert_eq!(store.get(0), Some(&0));
        assert_eq!(store.get(4), Some(&40));
        assert_eq!(store.get(9), Some(&90));
        assert_eq!(store.get(10), None);
        assert_eq!(store.iter().copied().collect::<Vec<_>>().len(), 10);
    }

    #[test]
    fn references_survive_later_blocks() {
        let store = BlockStore::new(2, 1024);
        push(&store, 7);
        let first = store.get(0).unwrap() as *const u64;
        for v in 0..500 {
            push(&store, v);
        }
        assert_eq!(store.get(0).unwrap() as *const u64, first);
        assert_eq!(*store.get(0).unwrap(), 7);
    }

    #[test]
    #[should_panic(expected = "block store is full")]
    fn push_past_capacity_panics() {
        let store = BlockStore::new(2, 3);
        for v in 0..4 {
            push(&store, v);
        }
    }

    #[test]
    fn drop_releases_only_written_slots() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let store = BlockStore::new(4, 16);
            for _ in 0..6 {
                unsafe { store.push_exclusive(Counted(drops.clone())) };
            }
        }
        assert_eq!(drops.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn readers_see_published_prefix() {
        let store = Arc::new(BlockStore::new(8, 1 << 14));
        let writer_lock = Arc::new(Mutex::new(()));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let lock = writer_lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = lock.lock();
                        let next = store.len() as u64;
                        unsafe { store.push_exclusive(next) };
                    }
                })
            })
            .collect();

        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let len = store.len();
                    if len > 0 {
                        let i = len - 1;
                        assert_eq!(*store.get(i).unwrap(), i as u64);
                    }
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(store.len(), 4000);
        for (i, v) in store.iter().enumerate() {
            assert_eq!(*v, i as u64);
        }
    }
}
