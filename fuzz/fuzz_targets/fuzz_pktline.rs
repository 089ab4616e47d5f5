//! Fuzz target for pkt-line parsing.
//!
//! Tests that the pkt-line reader handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = tessera_git::PktLineReader::new(Cursor::new(data));

    // Every packet consumes at least four bytes, so this terminates.
    while let Ok(Some(pkt)) = reader.read() {
        // Whatever was read must encode again.
        let _ = pkt.encode();
    }

    let mut reader = tessera_git::PktLineReader::new(Cursor::new(data));
    let _ = tessera_git::read_advertisement(&mut reader);
});
