//! Fuzz target for canonical object parsing.
//!
//! Tests that parsing arbitrary bytes never panics, and that anything that
//! parses serializes back to the same bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_storage::Object;

fuzz_target!(|data: &[u8]| {
    if let Ok(object) = Object::parse(data) {
        let reparsed = Object::parse(&object.canonical()).expect("canonical form parses");
        assert_eq!(reparsed.id(), object.id());
    }
});
