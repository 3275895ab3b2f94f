//! Fuzz target for the negotiation state machine
//!
//! Feeds a session an arbitrary sequence of replies and timeouts. The
//! session must never panic; cargo-fuzz builds keep debug assertions on, so
//! an illegal state edge panics too.

#![no_main]

use arbitrary::Arbitrary;
use ipconf_core::{NegotiationConfig, ProtocolMode, Session, WireMessage, XidPool};
use ipconf_transport::{HardwareAddr, Interface};
use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};

#[derive(Debug, Arbitrary)]
enum Step {
    /// Raw bytes arriving on the link
    Receive(Vec<u8>),
    /// A reply echoing the session's current xid, with a mutated tail
    Echo { options: Vec<u8>, yiaddr: u32 },
    /// Advance time
    Wait(u16),
}

#[derive(Debug, Arbitrary)]
struct Input {
    bootp: bool,
    auto: bool,
    steps: Vec<Step>,
}

fuzz_target!(|input: Input| {
    let mode = match (input.auto, input.bootp) {
        (true, _) => ProtocolMode::Auto,
        (false, true) => ProtocolMode::Bootp,
        (false, false) => ProtocolMode::Dhcp,
    };
    let config = NegotiationConfig {
        mode,
        max_attempts: 2,
        ..Default::default()
    };
    let hwaddr = HardwareAddr::new([2, 0, 0, 0, 0, 1]);
    let mut session = Session::new(&Interface::new("fuzz0", hwaddr), config);
    let mut xids = XidPool::seeded(0);
    let mut now = Instant::now();

    for step in input.steps {
        match step {
            Step::Receive(bytes) => {
                if let Ok(msg) = WireMessage::decode(&bytes) {
                    session.handle_message(&msg);
                }
            }
            Step::Echo { options, yiaddr } => {
                let Some(xid) = session.xid() else { continue };
                let request = WireMessage::request(xid, hwaddr);
                let mut bytes = WireMessage::reply(&request, yiaddr.into(), yiaddr.into()).encode();
                bytes.truncate(240);
                bytes.extend_from_slice(&options);
                if let Ok(msg) = WireMessage::decode(&bytes) {
                    session.handle_message(&msg);
                }
            }
            Step::Wait(ms) => {
                now += Duration::from_millis(u64::from(ms));
                let _ = session.poll(now, &mut xids);
            }
        }
        if session.is_terminal() {
            assert!(session.outcome().is_some());
            break;
        }
    }
});
