pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod record_table;
pub mod types;

pub use crate::config::RecordConfig;
pub use error::*;
pub use logging::init_tracing;
pub use memory::*;
pub use record_table::RecordTable;
pub use types::*;
