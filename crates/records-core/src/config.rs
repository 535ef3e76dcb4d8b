use std::path::Path;

use config as cfg;
use serde::{Deserialize, Serialize};

use crate::{RamDomain, RecordError, Result};

/// Slots per block: one million records.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

/// Every positive handle except `RamDomain::MAX` may be issued.
pub const DEFAULT_MAX_RECORDS: usize = RamDomain::MAX as usize - 1;

/// Upper bound on the block directory of one table, which is allocated up
/// front.
pub const MAX_BLOCKS: usize = 1 << 16;

/// Environment variable prefix, e.g. `RECORDS__BLOCK_SIZE=4096`.
pub const ENV_PREFIX: &str = "RECORDS";

/// Tuning for the per-shape intern tables.
///
/// All values are read once when a table is constructed and stay fixed for
/// the life of that table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Number of records per reverse-index block. Must be a power of two.
    #[serde(default = "RecordConfig::default_block_size")]
    pub block_size: usize,

    /// Number of handles a single shape may issue before interning aborts.
    #[serde(default = "RecordConfig::default_max_records")]
    pub max_records: usize,
}

impl RecordConfig {
    fn default_block_size() -> usize {
        DEFAULT_BLOCK_SIZE
    }

    fn default_max_records() -> usize {
        DEFAULT_MAX_RECORDS
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    /// Number of block slots needed to hold `max_records` records.
    pub fn max_blocks(&self) -> usize {
        self.max_records.div_ceil(self.block_size)
    }

    pub fn validate(&self) -> Result<()> {
        self.check().map_err(|e| RecordError::Config(e.to_string()))
    }

    fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.block_size > 0, "Block size must be greater than 0");

        anyhow::ensure!(
            self.block_size.is_power_of_two(),
            "Block size must be a power of two, got {}",
            self.block_size
        );

        anyhow::ensure!(
            self.max_records > 0,
            "Record capacity must be greater than 0"
        );

        anyhow::ensure!(
            self.max_records <= DEFAULT_MAX_RECORDS,
            "Record capacity {} exceeds the handle range ({})",
            self.max_records,
            DEFAULT_MAX_RECORDS
        );

        anyhow::ensure!(
            self.max_blocks() <= MAX_BLOCKS,
            "Block size {} needs {} blocks for {} records (limit {}); raise block_size or lower max_records",
            self.block_size,
            self.max_blocks(),
            self.max_records,
            MAX_BLOCKS
        );

        Ok(())
    }

    /// Loads `records.toml` from `config_dir` (if present), then applies
    /// `RECORDS__*` environment overrides.
    pub fn load_from_sources(config_dir: &Path) -> Result<Self> {
        let builder = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("records.toml")).required(false));
        Self::finish(builder)
    }

    /// Environment overrides only.
    pub fn from_env() -> Result<Self> {
        Self::finish(cfg::Config::builder())
    }

    fn finish(builder: cfg::ConfigBuilder<cfg::builder::DefaultState>) -> Result<Self> {
        let config: Self = builder
            .add_source(
                cfg::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RecordError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            block_size: Self::default_block_size(),
            max_records: Self::default_max_records(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        let config = RecordConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_size, 1 << 20);
        assert_eq!(config.max_blocks(), 2048);
    }

    #[test]
    fn rejects_non_power_of_two_blocks() {
        let config = RecordConfig::default().with_block_size(1000);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RecordError::Config(msg) if msg.contains("power of two")));
    }

    #[test]
    fn rejects_capacity_outside_handle_range() {
        assert!(RecordConfig::default().with_max_records(0).validate().is_err());
        assert!(RecordConfig::default()
            .with_max_records(RamDomain::MAX as usize)
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_oversized_block_directory() {
        let config = RecordConfig::default().with_block_size(16);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RecordError::Config(msg) if msg.contains("blocks")));

        let bounded = config.with_max_records(16 * MAX_BLOCKS);
        assert!(bounded.validate().is_ok());
        assert!(bounded.with_max_records(16 * MAX_BLOCKS + 1).validate().is_err());
    }

    #[test]
    fn max_blocks_rounds_up() {
        let config = RecordConfig::default()
            .with_block_size(4)
            .with_max_records(9);
        assert_eq!(config.max_blocks(), 3);
    }

    #[test]
    fn loads_from_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("records.toml"),
            "block_size = 256\nmax_records = 1000\n",
        )
        .unwrap();

        let config = RecordConfig::load_from_sources(dir.path()).unwrap();
        assert_eq!(config.block_size, 256);
        assert_eq!(config.max_records, 1000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RecordConfig::load_from_sources(dir.path()).unwrap();
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.max_records, DEFAULT_MAX_RECORDS);
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("records.toml"), "block_size = 3\n").unwrap();
        let err = RecordConfig::load_from_sources(dir.path()).unwrap_err();
        assert!(matches!(err, RecordError::Config(_)));
    }

    #[test]
    fn toml_round_trip() {
        let config = RecordConfig::default().with_block_size(64);
        let text = toml::to_string(&config).unwrap();
        let back: RecordConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }
}
