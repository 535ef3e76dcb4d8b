use thiserror::Error;

use crate::types::RamDomain;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid handle {handle} for shape {shape}: {issued} record(s) issued")]
    InvalidHandle {
        shape: &'static str,
        handle: RamDomain,
        issued: usize,
    },

    #[error("Arity mismatch: expected {expected} field(s), found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("Handle space exhausted for shape {shape}: capacity is {capacity} record(s)")]
    Exhausted {
        shape: &'static str,
        capacity: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RecordError>;
