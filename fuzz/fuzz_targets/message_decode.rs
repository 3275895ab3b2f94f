//! Fuzz target for BOOTP/DHCP message decoding
//!
//! Decoding must never panic, and anything that decodes must survive a
//! re-encode and decode unchanged.

#![no_main]

use ipconf_core::WireMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(msg) = WireMessage::decode(data) else {
        return;
    };

    // Accessors walk the option list; exercise them too
    let _ = msg.message_type();
    let _ = msg.server_id();
    let _ = msg.string_option(ipconf_core::options::tag::HOST_NAME);
    let _ = msg.sname_str();
    let _ = msg.file_str();

    let again = WireMessage::decode(&msg.encode()).expect("re-encoded message decodes");
    assert_eq!(again.xid, msg.xid);
    assert_eq!(again.yiaddr, msg.yiaddr);
});
