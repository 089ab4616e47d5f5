//! Fuzz target for pack index files.
//!
//! Tests that index parsing and lookups handle arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_storage::ObjectId;

fuzz_target!(|data: &[u8]| {
    let Ok(index) = tessera_storage::pack::PackIndex::from_bytes(data.to_vec()) else {
        return;
    };

    for n in 0..index.len().min(64) {
        if let Some(id) = index.id_at(n) {
            let _ = index.lookup(&id);
        }
        let _ = index.offset_at(n);
        let _ = index.crc_at(n);
    }
    let _ = index.lookup(&ObjectId::ZERO);
    let _ = index.lookup(&ObjectId::from_bytes([0xff; 20]));
});
