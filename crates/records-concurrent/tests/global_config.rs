//! Runs in its own process so the global registry is first touched here.

use records_concurrent::{pack, unpack, RamDomain, RecordConfig, RecordRegistry};

#[test]
fn invalid_env_falls_back_to_defaults() {
    std::env::set_var("RECORDS__BLOCK_SIZE", "3");

    let registry = RecordRegistry::global();
    assert_eq!(registry.config(), &RecordConfig::default());

    let handle = pack(&[11 as RamDomain, 12]);
    assert_eq!(handle, 1);
    assert_eq!(unpack::<[RamDomain; 2]>(handle), &[11, 12]);
}
