//! Fuzz target: `hex::decode_key` and `hex::uid_hex`
//!
//! Backend-supplied key strings are decoded without validation up front;
//! any input must yield a 16-byte key without panicking.
//!
//! cargo fuzz run fuzz_key_hex

#![no_main]

use attractap::nfc::hex::{decode_key, uid_hex};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let key = decode_key(&text);

    // A well-formed key must survive the trip through uid-style hex.
    if text.len() == 32 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
        let mut round = String::new();
        for half in key.chunks(7) {
            round.push_str(&uid_hex(half));
        }
        assert_eq!(round, text.to_ascii_lowercase());
    }
});
