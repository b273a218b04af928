//! Hex conversions for card keys and UIDs.
//!
//! Keys arrive from the backend as 32 hex characters.  Input that is
//! short, long or contains non-hex characters is not rejected.  Each pair
//! decodes its leading hex digits and stops at the first invalid one, so
//! `"1z"` is `0x01` and `"z1"` is `0x00`; missing pairs stay `0x00`.  The
//! problem is logged and the card then simply fails authentication, which
//! is reported upstream.

use core::fmt::Write;

use log::warn;

use crate::app::ports::Key;

/// Hex characters in one encoded [`Key`].
pub const KEY_HEX_LEN: usize = 32;

/// Lowercase hex of a 7-byte UID.
pub type UidHex = heapless::String<14>;

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Value of the leading hex digits of `pair`, and whether every
/// character was a digit.
fn leading_byte(pair: &[u8]) -> (u8, bool) {
    let mut value = 0u8;
    for &c in pair {
        match nibble(c) {
            Some(n) => value = (value << 4) | n,
            None => return (value, false),
        }
    }
    (value, true)
}

/// Decode a 16-byte key, zero-filling whatever is missing.
pub fn decode_key(hex: &str) -> Key {
    let mut key = [0u8; 16];
    let bytes = hex.as_bytes();
    let mut malformed = bytes.len() != KEY_HEX_LEN;

    for (out, pair) in key.iter_mut().zip(bytes.chunks(2)) {
        let (value, clean) = leading_byte(pair);
        *out = value;
        malformed |= !clean;
    }

    if malformed {
        warn!(
            "NFC: malformed key ({} chars, expected {}), invalid bytes zero-filled",
            bytes.len(),
            KEY_HEX_LEN
        );
    }
    key
}

/// Lowercase, zero-padded hex; UIDs longer than 7 bytes are cut.
pub fn uid_hex(uid: &[u8]) -> UidHex {
    let mut out = UidHex::new();
    for b in uid.iter().take(7) {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
