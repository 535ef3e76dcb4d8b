use std::any::Any;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use records_core::{
    FxBuildHasher, RamDomain, Record, RecordConfig, RecordTable, Result, Shape, ShapeId,
};
use tracing::{debug, info, warn};

use crate::record_map::{RecordMap, RecordSource};

#[derive(Clone, Copy)]
struct ShapeEntry {
    map: &'static (dyn Any + Send + Sync),
    source: &'static dyn RecordSource,
}

/// Process-wide collection of intern tables, one per record shape.
///
/// Tables are created on first request and live for the rest of the process;
/// the registry only keeps references to them. The first call to
/// `record_table` takes a snapshot of every table and that snapshot is
/// returned unchanged from then on, so records interned later are not part of
/// it.
pub struct RecordRegistry {
    config: RecordConfig,
    maps: DashMap<ShapeId, ShapeEntry, FxBuildHasher>,
    snapshot: OnceCell<RecordTable>,
}

static GLOBAL_REGISTRY: Lazy<RecordRegistry> = Lazy::new(|| {
    let config = RecordConfig::from_env().unwrap_or_else(|e| {
        warn!("invalid record configuration, using defaults: {}", e);
        RecordConfig::default()
    });
    RecordRegistry::with_validated(config)
});

impl RecordRegistry {
    pub fn new(config: RecordConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_validated(config))
    }

    pub fn with_defaults() -> Self {
        Self::with_validated(RecordConfig::default())
    }

    fn with_validated(config: RecordConfig) -> Self {
        Self {
            config,
            maps: DashMap::with_hasher(FxBuildHasher::default()),
            snapshot: OnceCell::new(),
        }
    }

    /// The registry used by the free functions of this crate.
    pub fn global() -> &'static RecordRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn config(&self) -> &RecordConfig {
        &self.config
    }

    /// The table for shape `R`, created on first use. Concurrent first
    /// requests build exactly one table.
    pub fn map<R: Record>(&self) -> &'static RecordMap<R> {
        let id = ShapeId::of::<R>();
        let entry = match self.maps.get(&id).map(|e| *e) {
            Some(entry) => entry,
            None => *self.maps.entry(id).or_insert_with(|| self.create::<R>()),
        };
        match entry.map.downcast_ref::<RecordMap<R>>() {
            Some(map) => map,
            None => unreachable!("shape {} registered with a foreign table", Shape::of::<R>()),
        }
    }

    fn create<R: Record>(&self) -> ShapeEntry {
        let map: &'static RecordMap<R> =
            Box::leak(Box::new(RecordMap::with_validated(&self.config)));
        debug!(shape = %map.shape(), block_size = map.block_size(), "created record map");
        ShapeEntry { map, source: map }
    }

    #[inline]
    pub fn pack<R: Record>(&self, record: &R) -> RamDomain {
        self.map::<R>().pack(record)
    }

    #[inline]
    pub fn unpack<R: Record>(&self, handle: RamDomain) -> &'static R {
        self.map::<R>().unpack(handle)
    }

    pub fn try_unpack<R: Record>(&self, handle: RamDomain) -> Result<&'static R> {
        self.map::<R>().try_unpack(handle)
    }

    /// Number of shapes with a table.
    pub fn table_count(&self) -> usize {
        self.maps.len()
    }

    /// Shapes with a table, ordered by arity then name.
    pub fn shapes(&self) -> Vec<Shape> {
        let mut shapes: Vec<Shape> = self.maps.iter().map(|e| e.source.shape()).collect();
        shapes.sort();
        shapes
    }

    /// Every record of every shape, flattened. Computed once.
    pub fn record_table(&self) -> &RecordTable {
        self.snapshot.get_or_init(|| {
            let mut sources: Vec<&'static dyn RecordSource> =
                self.maps.iter().map(|e| e.source).collect();
            sources.sort_by_key(|s| s.shape());

            let mut table = RecordTable::new();
            for source in &sources {
                source.export_into(&mut table);
            }
            info!(
                shapes = sources.len(),
                records = table.len(),
                "record table snapshot taken"
            );
            table
        })
    }
}

impl Default for RecordRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Interns `record` in the global registry.
#[inline]
pub fn pack<R: Record>(record: &R) -> RamDomain {
    RecordRegistry::global().pack(record)
}

/// Dereferences a handle issued by [`pack`] for the same shape.
#[inline]
pub fn unpack<R: Record>(handle: RamDomain) -> &'static R {
    RecordRegistry::global().unpack(handle)
}

pub fn try_unpack<R: Record>(handle: RamDomain) -> Result<&'static R> {
    RecordRegistry::global().try_unpack(handle)
}

/// Snapshot of every record in the global registry; see
/// [`RecordRegistry::record_table`].
pub fn record_table() -> &'static RecordTable {
    RecordRegistry::global().record_table()
}

#[cfg(test)]
mod tests {
    use super::*;
    use records_core::RecordError;

    fn registry() -> RecordRegistry {
        RecordRegistry::new(
            RecordConfig::default()
                .with_block_size(8)
                .with_max_records(4096),
        )
        .unwrap()
    }

    #[test]
    fn same_shape_same_table() {
        let reg = registry();
        let a = reg.map::<[RamDomain; 2]>() as *const _;
        let b = reg.map::<[RamDomain; 2]>() as *const _;
        assert_eq!(a, b);
        assert_eq!(reg.table_count(), 1);
    }

    #[test]
    fn shapes_do_not_share_handles() {
        let reg = registry();
        assert_eq!(reg.pack(&[1, 2]), 1);
        assert_eq!(reg.pack(&[1, 2, 3]), 1);
        assert_eq!(reg.pack(&[9, 9]), 2);
        assert_eq!(reg.unpack::<[RamDomain; 2]>(1), &[1, 2]);
        assert_eq!(reg.unpack::<[RamDomain; 3]>(1), &[1, 2, 3]);
        assert_eq!(reg.table_count(), 2);

        let arities: Vec<_> = reg.shapes().iter().map(|s| s.arity).collect();
        assert_eq!(arities, vec![2, 3]);
    }

    #[test]
    fn registries_are_independent() {
        let a = registry();
        let b = registry();
        a.pack(&[7]);
        assert_eq!(b.pack(&[8]), 1);
        assert_eq!(a.map::<[RamDomain; 1]>().len(), 1);
        assert_eq!(b.map::<[RamDomain; 1]>().len(), 1);
    }

    #[test]
    fn try_unpack_reports_unissued_handles() {
        let reg = registry();
        reg.pack(&[1, 1]);
        assert!(matches!(
            reg.try_unpack::<[RamDomain; 2]>(5),
            Err(RecordError::InvalidHandle { handle: 5, .. })
        ));
    }

    #[test]
    fn snapshot_is_taken_once() {
        let reg = registry();
        reg.pack(&[3, 4]);
        reg.pack(&[5, 6]);
        reg.pack(&[3, 4]);

        let pairs = Shape::of::<[RamDomain; 2]>();
        let table = reg.record_table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&pairs, 1), Some(&[3, 4][..]));
        assert_eq!(table.get(&pairs, 2), Some(&[5, 6][..]));

        reg.pack(&[7, 8]);
        assert_eq!(reg.record_table().len(), 2);
        assert_eq!(reg.record_table().get(&pairs, 3), None);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = RecordConfig::default().with_max_records(0);
        assert!(RecordRegistry::new(config).is_err());
    }
}
