//! Fuzz target for received pack files.
//!
//! Tests that the pack parser handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut parser = tessera_git::PackParser::new(data);
    let _ = parser.parse();

    // The same bytes through the storage-side reader.
    if let Ok(pack) = tessera_storage::pack::PackData::from_bytes(data.to_vec()) {
        let _ = pack.verify_checksum();
        let _ = pack.record_header(12);
    }
});
