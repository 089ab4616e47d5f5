//! Fuzz target for the upload-pack want and have phases.
//!
//! Tests that a session fed arbitrary client input fails cleanly.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;
use tessera_git::{PktLineReader, UploadPack, UploadPackOptions};
use tessera_storage::ObjectStore;

fuzz_target!(|data: &[u8]| {
    // Nothing exists in this store, so wants fail after parsing.
    let store = ObjectStore::new("/nonexistent/tessera-fuzz/objects");
    let mut session = UploadPack::new(&store, UploadPackOptions::default());
    if session.skip_advertisement().is_err() {
        return;
    }

    let mut reader = PktLineReader::new(Cursor::new(data));
    if session.collect_wants(&mut reader).is_ok() && !session.wants().is_empty() {
        let _ = session.collect_haves(&mut reader);
    }
});
