use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Categories for attributing memory usage of interned records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryCategory {
    /// Reverse-index blocks; items count reserved slots.
    RecordBlocks,
    /// Forward-map entries; items count interned records.
    ForwardMap,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub items: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
pub struct MemoryTracker {
    inner: Mutex<HashMap<MemoryCategory, CategoryStats>>,
}

impl MemoryTracker {
    pub fn record_alloc(&self, category: MemoryCategory, items: u64, bytes: u64) {
        let mut g = self.inner.lock();
        let e = g.entry(category).or_default();
        e.items = e.items.saturating_add(items);
        e.bytes = e.bytes.saturating_add(bytes);
    }

    pub fn record_free(&self, category: MemoryCategory, items: u64, bytes: u64) {
        let mut g = self.inner.lock();
        let e = g.entry(category).or_default();
        e.items = e.items.saturating_sub(items);
        e.bytes = e.bytes.saturating_sub(bytes);
    }

    pub fn stats(&self, category: MemoryCategory) -> CategoryStats {
        self.inner.lock().get(&category).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<MemoryCategory, CategoryStats> {
        self.inner.lock().clone()
    }

    /// Runs `f` against the live counters. Allocations and frees recorded
    /// meanwhile wait for `f` to return.
    pub fn inspect<T>(&self, f: impl FnOnce(&HashMap<MemoryCategory, CategoryStats>) -> T) -> T {
        f(&self.inner.lock())
    }
}

pub static MEMORY_TRACKER: Lazy<MemoryTracker> = Lazy::new(MemoryTracker::default);
