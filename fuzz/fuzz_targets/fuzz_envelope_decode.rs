//! Fuzz target: `envelope::decode`
//!
//! Feeds arbitrary text to the inbound frame decoder.  It must never
//! panic, and every accepted frame must carry a non-empty type and an
//! object payload that re-encodes into a frame of bounded size.
//!
//! cargo fuzz run fuzz_envelope_decode

#![no_main]

use attractap::api::envelope::{self, Direction};
use attractap::bus::MAX_FRAME_LEN;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let Ok(msg) = envelope::decode(text) else {
        return;
    };
    assert!(!msg.kind.is_empty(), "accepted frame without a type");
    assert!(msg.payload.is_object(), "payload must be normalised to an object");

    if let Ok(frame) = envelope::encode(Direction::Response, &msg.kind, &msg.payload) {
        assert!(frame.len() <= MAX_FRAME_LEN);
    }
});
