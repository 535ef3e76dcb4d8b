//! Interning of fixed-arity records as dense integer handles.
//!
//! - `block_store`: Append-only block storage backing the handle-to-record index
//! - `record_map`: Per-shape intern table with locked `pack` and lock-free `unpack`
//! - `registry`: Shape-keyed table factory, whole-program export and the global instance

pub mod block_store;
pub mod record_map;
pub mod registry;

pub use block_store::BlockStore;
pub use record_map::{RecordMap, RecordSource, UNIT_HANDLE};
pub use registry::{pack, record_table, try_unpack, unpack, RecordRegistry};

pub use records_core::{
    is_null, null, RamDomain, Record, RecordConfig, RecordError, RecordTable, Shape,
};
