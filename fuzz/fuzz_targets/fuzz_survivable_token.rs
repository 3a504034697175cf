//! Fuzz target: `SurvivableToken` validation
//!
//! Overlays arbitrary bytes on a sealed token, the way stale retained RAM
//! looks after a brown-out, and checks:
//! - No panics for any header or payload contents
//! - `as_str` only yields text when `is_valid` holds
//! - An untouched token round-trips
//!
//! cargo fuzz run fuzz_survivable_token

#![no_main]

use libfuzzer_sys::fuzz_target;
use probelink::survivable::{SurvivableToken, TOKEN_CAPACITY};

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let (header, rest) = data.split_at(8);
    let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let mut t = SurvivableToken::zeroed();
    if let Ok(text) = core::str::from_utf8(rest) {
        if t.set(text, None).is_ok() {
            assert!(t.is_valid(0));
            assert_eq!(t.as_str(), Some(text));
        }
    }

    t.token.crc = crc;
    t.token.length = length;
    let n = rest.len().min(TOKEN_CAPACITY);
    t.token.data[..n].copy_from_slice(&rest[..n]);

    let valid = t.is_valid(0);
    if !valid {
        assert!(t.token.get().is_none());
    }
    if t.as_str().is_some() {
        assert!(t.token.is_valid());
    }
    let _ = t.needs_refresh(core::time::Duration::from_secs(300), i64::MAX);
});
