//! Fuzz target for IPv4/UDP frame parsing
//!
//! Tests that frame validation handles arbitrary input without panicking.

#![no_main]

use ipconf_transport::framing;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = framing::decapsulate(data);

    if let Ok(payload) = framing::client_payload(data) {
        let _ = ipconf_core::WireMessage::decode(payload);
    }
});
