//! Memory accounting for the record store.
//!
//! - `tracker`: per-category counters for reverse-index blocks and forward-map entries

pub mod tracker;

pub use tracker::*;
