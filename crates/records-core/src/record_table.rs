use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use tracing::warn;

use crate::{RamDomain, Shape};

/// Flattened view of every interned record, grouped by shape.
///
/// Each shape has its own handle space, so two shapes of the same arity may
/// both own handle 1. Shapes iterate in (arity, name) order.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    by_shape: BTreeMap<Shape, BTreeMap<RamDomain, Vec<RamDomain>>>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a (handle, fields) pair for `shape`. A handle already present for
    /// that shape keeps its first value.
    pub fn add_record(&mut self, shape: Shape, handle: RamDomain, fields: &[RamDomain]) {
        debug_assert_eq!(shape.arity, fields.len());
        let records = self.by_shape.entry(shape).or_default();
        match records.get(&handle) {
            Some(existing) if existing.as_slice() != fields => {
                warn!(%shape, handle, "record handle exported twice; keeping first");
            }
            Some(_) => {}
            None => {
                records.insert(handle, fields.to_vec());
            }
        }
    }

    pub fn get(&self, shape: &Shape, handle: RamDomain) -> Option<&[RamDomain]> {
        self.by_shape
            .get(shape)
            .and_then(|records| records.get(&handle))
            .map(Vec::as_slice)
    }

    /// Every record of `shape`, keyed by handle.
    pub fn records(&self, shape: &Shape) -> Option<&BTreeMap<RamDomain, Vec<RamDomain>>> {
        self.by_shape.get(shape)
    }

    /// Total number of records across all shapes.
    pub fn len(&self) -> usize {
        self.by_shape.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shapes(&self) -> impl Iterator<Item = Shape> + '_ {
        self.by_shape.keys().copied()
    }

    /// All records in (shape, handle) order.
    pub fn iter(&self) -> impl Iterator<Item = (Shape, RamDomain, &[RamDomain])> + '_ {
        self.by_shape.iter().flat_map(|(&shape, records)| {
            records
                .iter()
                .map(move |(&handle, fields)| (shape, handle, fields.as_slice()))
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Serializes as `{"<name>/<arity>": {handle: fields}}`.
impl Serialize for RecordTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.by_shape
                .iter()
                .map(|(shape, records)| (shape.to_string(), records)),
        )
    }
}
