//! Fuzz target for replicated message decoding.
//!
//! `decode` must never panic on arbitrary input, and anything it accepts
//! must encode back to the same bytes.

#![no_main]

use ha_event_replication::codec::{decode, encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(events) = decode(data) {
        let reencoded = encode(&events).expect("decoded events are always encodable");
        assert_eq!(reencoded.as_slice(), data);
    }
});
