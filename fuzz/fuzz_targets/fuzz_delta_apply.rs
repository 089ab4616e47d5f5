//! Fuzz target for delta application.
//!
//! Tests that applying arbitrary patches to arbitrary bases never panics and
//! never produces a result of the wrong length.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    base: Vec<u8>,
    patch: Vec<u8>,
}

fuzz_target!(|input: Input| {
    if let Ok(result) = tessera_storage::delta::apply(&input.base, &input.patch) {
        let (_, size, _) = tessera_storage::delta::read_header(&input.patch)
            .expect("applied patch has a header");
        assert_eq!(result.len() as u64, size);
    }
});
