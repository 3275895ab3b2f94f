//! End-to-end negotiation tests.
//!
//! Every test drives a real `Coordinator` over `MemoryTransport`, with
//! `FakeServer` answering on the far side. Time is simulated, so multi-second
//! backoffs complete instantly.

use ipconf_core::options::{DhcpOption, MessageType, tag};
use ipconf_core::{Protocol, ProtocolMode, SessionError, SessionState, WireMessage};
use ipconf_integration_tests::{
    FakeServer, SERVER, coordinator, fast_config, iface, sent_messages, server_frame,
};
use ipconf_transport::{Clock, MemoryTransport, PacketTransport, framing};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

const ADDR: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

// ============================================================================
// Successful negotiation
// ============================================================================

#[test]
fn test_dhcp_offer_and_ack() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .option(DhcpOption::ipv4(tag::SUBNET_MASK, Ipv4Addr::new(255, 255, 255, 0)))
        .option(DhcpOption::ipv4_list(tag::ROUTER, &[SERVER]))
        .option(DhcpOption::ipv4_list(
            tag::DNS_SERVERS,
            &[Ipv4Addr::new(203, 0, 113, 53)],
        ))
        .option(DhcpOption::string(tag::DOMAIN_NAME, "example.net"))
        .option(DhcpOption::u32(tag::LEASE_TIME, 3600))
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    assert_eq!(outcomes.len(), 1);
    let result = outcomes[0].result.as_ref().unwrap();
    assert_eq!(result.interface, "eth0");
    assert_eq!(result.protocol, Protocol::Dhcp);
    assert_eq!(result.address, ADDR);
    assert_eq!(result.prefix_len, 24);
    assert_eq!(result.gateway, Some(SERVER));
    assert_eq!(result.dns_servers, [Ipv4Addr::new(203, 0, 113, 53)]);
    assert_eq!(result.domain_name.as_deref(), Some("example.net"));
    assert_eq!(result.lease_secs, 3600);
    assert_eq!(result.server_id, Some(SERVER));

    let text = result.to_string();
    assert!(text.contains("DEVICE=eth0"));
    assert!(text.contains("IPV4ADDR=203.0.113.5"));
    assert!(text.contains("IPV4NETMASK=255.255.255.0"));
    assert!(text.contains("LEASETIME=3600"));

    let sent = sent_messages(coord.transport(), "eth0");
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].message_type(), Some(MessageType::Discover));
    assert_eq!(sent[1].message_type(), Some(MessageType::Request));
    assert_eq!(sent[0].xid, sent[1].xid);
    assert_eq!(
        sent[1].ipv4_option(tag::REQUESTED_ADDRESS),
        Some(ADDR)
    );
    assert_eq!(sent[1].server_id(), Some(SERVER));

    assert!(!coord.transport().is_open("eth0"));
}

#[test]
fn test_bootp_only_mode() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .boot_file("pxelinux.0")
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Bootp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    let result = outcomes[0].result.as_ref().unwrap();
    assert_eq!(result.protocol, Protocol::Bootp);
    assert_eq!(result.address, ADDR);
    assert_eq!(result.lease_secs, 0);
    assert_eq!(result.next_server, Some(SERVER));
    assert_eq!(result.boot_file.as_deref(), Some("pxelinux.0"));
    // Class C default mask without option 1
    assert_eq!(result.prefix_len, 24);

    let sent = sent_messages(coord.transport(), "eth0");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message_type(), None);
    assert!(sent[0].options.is_empty());
}

#[test]
fn test_falls_back_to_bootp_server() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .dhcp(false)
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Auto, 2));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    let result = outcomes[0].result.as_ref().unwrap();
    assert_eq!(result.protocol, Protocol::Bootp);
    assert!(coord.session("eth0").unwrap().downgraded());

    // Two discovers, then one BOOTP request under a new xid
    let sent = sent_messages(coord.transport(), "eth0");
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1].message_type(), Some(MessageType::Discover));
    assert_eq!(sent[2].message_type(), None);
    assert_ne!(sent[1].xid, sent[2].xid);
}

#[test]
fn test_nak_restarts_discovery() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .nak_first(1)
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    assert_eq!(outcomes[0].result.as_ref().unwrap().address, ADDR);

    let kinds: Vec<_> = sent_messages(coord.transport(), "eth0")
        .iter()
        .map(WireMessage::message_type)
        .collect();
    assert_eq!(
        kinds,
        [
            Some(MessageType::Discover),
            Some(MessageType::Request),
            Some(MessageType::Discover),
            Some(MessageType::Request),
        ]
    );

    let sent = sent_messages(coord.transport(), "eth0");
    assert_ne!(sent[0].xid, sent[2].xid);
}

#[test]
fn test_stale_reply_discarded_on_downgrade() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .dhcp(false)
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Auto, 2));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let clock = coord.transport().clock().clone();

    // Run until the last DHCP retry is due but not yet handled
    loop {
        assert!(!coord.tick());
        let session = coord.session("eth0").unwrap();
        if session.attempts() == 2 && session.retry_deadline().is_some_and(|at| clock.now() >= at) {
            break;
        }
    }
    let old_xid = coord.session("eth0").unwrap().xid().unwrap();

    // A late offer for the DHCP xid is sitting in the queue
    let discover = sent_messages(coord.transport(), "eth0")[0].clone();
    let stale = WireMessage::offer(&discover, ADDR, SERVER);
    coord.transport_mut().inject("eth0", server_frame(&stale));

    let outcomes = coord.run();
    let result = outcomes[0].result.as_ref().unwrap();
    assert_eq!(result.protocol, Protocol::Bootp);
    assert_eq!(coord.transport().stats().dropped, 1);

    let sent = sent_messages(coord.transport(), "eth0");
    let last = sent.last().unwrap();
    assert_eq!(last.message_type(), None);
    assert_ne!(last.xid, old_xid);
}

#[test]
fn test_malformed_replies_ignored() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .delay("eth0", Duration::from_millis(50))
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();

    // Queued behind the first discover so the xid change does not flush them
    let at = coord.transport().clock().now() + Duration::from_millis(10);
    let garbage = framing::server_frame(b"not a message", SERVER, Ipv4Addr::BROADCAST).unwrap();
    let mut bad_cookie = WireMessage::discover(1, iface("eth0", 1).hwaddr).encode();
    bad_cookie[236] = 0;
    let bad_cookie = framing::server_frame(&bad_cookie, SERVER, Ipv4Addr::BROADCAST).unwrap();
    coord.transport_mut().inject_at("eth0", garbage, at);
    coord.transport_mut().inject_at("eth0", bad_cookie, at);

    let outcomes = coord.run();
    assert!(outcomes[0].is_configured());
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_bootp_mode_against_dhcp_only_server() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .bootp(false)
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Bootp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    assert_eq!(
        outcomes[0].result,
        Err(SessionError::RetriesExhausted { attempts: 3 })
    );
    assert!(
        sent_messages(coord.transport(), "eth0")
            .iter()
            .all(|m| m.message_type().is_none())
    );
}

#[test]
fn test_silence_downgrades_then_fails() {
    let mut coord = coordinator(MemoryTransport::new(), fast_config(ProtocolMode::Auto, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    assert_eq!(
        outcomes[0].result,
        Err(SessionError::RetriesExhausted { attempts: 6 })
    );

    let sent = sent_messages(coord.transport(), "eth0");
    assert_eq!(sent.len(), 6);

    let (dhcp, bootp) = sent.split_at(3);
    assert!(dhcp.iter().all(|m| m.message_type() == Some(MessageType::Discover)));
    assert!(bootp.iter().all(|m| m.message_type().is_none()));

    // Retransmissions reuse the xid; the downgrade draws a new one
    assert!(dhcp.iter().all(|m| m.xid == dhcp[0].xid));
    assert!(bootp.iter().all(|m| m.xid == bootp[0].xid));
    assert_ne!(dhcp[0].xid, bootp[0].xid);

    // 1s, 2s, 4s per phase
    let secs: Vec<u16> = sent.iter().map(|m| m.secs).collect();
    assert_eq!(secs, [0, 1, 3, 7, 8, 10]);
    assert_eq!(coord.transport().clock().elapsed(), Duration::from_secs(14));
}

#[test]
fn test_deadline_while_offered() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .delay("eth0", Duration::from_secs(5))
        .install(&mut transport);

    let config = ipconf_core::NegotiationConfig {
        initial_timeout: Duration::from_secs(10),
        max_backoff: Duration::from_secs(10),
        global_deadline: Duration::from_secs(5),
        ..fast_config(ProtocolMode::Dhcp, 3)
    };
    let mut coord = coordinator(transport, config);
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    assert_eq!(
        outcomes[0].result,
        Err(SessionError::DeadlineExpired(SessionState::Offered))
    );
    // The request was never sent
    assert_eq!(coord.transport().sent_frames("eth0").len(), 1);
    assert_eq!(coord.transport().clock().elapsed(), Duration::from_secs(5));
    assert!(!coord.transport().is_open("eth0"));
}

#[test]
fn test_deadline_fails_every_interface() {
    let config = ipconf_core::NegotiationConfig {
        global_deadline: Duration::from_secs(2),
        ..fast_config(ProtocolMode::Auto, 5)
    };
    let mut coord = coordinator(MemoryTransport::new(), config);
    coord.add_interface(iface("eth0", 1)).unwrap();
    coord.add_interface(iface("eth1", 2)).unwrap();
    let outcomes = coord.run();

    for outcome in &outcomes {
        assert_eq!(
            outcome.result,
            Err(SessionError::DeadlineExpired(SessionState::Discovering))
        );
    }
    assert_eq!(coord.transport().clock().elapsed(), Duration::from_secs(2));
}

#[test]
fn test_unavailable_device_is_isolated() {
    let mut transport = MemoryTransport::new();
    transport.mark_unavailable("eth1", "no such device");
    FakeServer::new()
        .lease("eth0", ADDR)
        .lease("eth1", Ipv4Addr::new(203, 0, 113, 6))
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    coord.add_interface(iface("eth1", 2)).unwrap();
    let outcomes = coord.run();

    assert!(outcomes[0].is_configured());
    match &outcomes[1].result {
        Err(SessionError::DeviceUnavailable(reason)) => assert!(reason.contains("no such device")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(coord.transport().sent_frames("eth1").is_empty());
}

#[test]
fn test_transient_send_failures() {
    let mut transport = MemoryTransport::new();
    transport.fail_sends("eth0", 2);
    FakeServer::new().lease("eth0", ADDR).install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    // Third discover gets through at t=3s
    assert!(outcomes[0].is_configured());
    assert_eq!(coord.transport().stats().send_errors, 2);
    assert_eq!(coord.session("eth0").unwrap().attempts(), 1);
}

#[test]
fn test_transient_receive_failures() {
    let mut transport = MemoryTransport::new();
    transport.fail_receives("eth0", 3);
    FakeServer::new().lease("eth0", ADDR).install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    let outcomes = coord.run();

    assert_eq!(outcomes[0].result.as_ref().unwrap().address, ADDR);
    assert_eq!(coord.transport().stats().recv_errors, 3);
    // The failures cost no retransmission: one discover, one request
    assert_eq!(coord.transport().sent_frames("eth0").len(), 2);
}

#[test]
fn test_device_lost_mid_negotiation() {
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .lease("eth1", Ipv4Addr::new(203, 0, 113, 6))
        .delay("eth0", Duration::from_secs(2))
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    coord.add_interface(iface("eth0", 1)).unwrap();
    coord.add_interface(iface("eth1", 2)).unwrap();
    assert!(!coord.tick());
    coord.transport_mut().mark_unavailable("eth0", "removed");
    let outcomes = coord.run();

    match &outcomes[0].result {
        Err(SessionError::DeviceUnavailable(reason)) => assert!(reason.contains("removed")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(outcomes[1].result.as_ref().unwrap().address, Ipv4Addr::new(203, 0, 113, 6));
    assert!(!coord.transport().is_open("eth0"));
}

// ============================================================================
// Multiple interfaces
// ============================================================================

#[test]
fn test_cross_talk_does_not_disturb_other_interface() {
    let other = Ipv4Addr::new(203, 0, 113, 6);
    let mut transport = MemoryTransport::new();
    FakeServer::new()
        .lease("eth0", ADDR)
        .lease("eth1", other)
        .delay("eth1", Duration::from_millis(1500))
        .install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    let eth0 = iface("eth0", 1);
    let eth1 = iface("eth1", 2);
    coord.add_interface(eth0.clone()).unwrap();
    coord.add_interface(eth1.clone()).unwrap();

    while coord.session("eth0").unwrap().state() != SessionState::Bound {
        assert!(!coord.tick());
    }
    assert_eq!(
        coord.session("eth1").unwrap().state(),
        SessionState::Discovering
    );

    // eth0's ack also shows up on eth1, plus an offer with eth1's xid but
    // eth0's hardware address
    let eth0_xid = coord.session("eth0").unwrap().xid().unwrap();
    let eth1_xid = coord.session("eth1").unwrap().xid().unwrap();
    let stray_ack = WireMessage::ack(&WireMessage::discover(eth0_xid, eth0.hwaddr), ADDR, SERVER);
    let spoofed = WireMessage::offer(&WireMessage::discover(eth1_xid, eth0.hwaddr), ADDR, SERVER);
    coord.transport_mut().inject("eth1", server_frame(&stray_ack));
    coord.transport_mut().inject("eth1", server_frame(&spoofed));

    assert!(!coord.tick());
    assert_eq!(
        coord.session("eth1").unwrap().state(),
        SessionState::Discovering
    );
    assert_eq!(coord.session("eth1").unwrap().xid(), Some(eth1_xid));

    let outcomes = coord.run();
    assert_eq!(outcomes[0].result.as_ref().unwrap().address, ADDR);
    assert_eq!(outcomes[1].result.as_ref().unwrap().address, other);
}

#[test]
fn test_partial_success() {
    let mut transport = MemoryTransport::new();
    FakeServer::new().lease("eth1", ADDR).install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 2));
    coord.add_interface(iface("eth0", 1)).unwrap();
    coord.add_interface(iface("eth1", 2)).unwrap();
    let outcomes = coord.run();

    // Results come back in the order interfaces were added
    assert_eq!(outcomes[0].interface, "eth0");
    assert_eq!(outcomes[1].interface, "eth1");
    assert!(!outcomes[0].is_configured());
    assert!(outcomes[1].is_configured());
}

#[test]
fn test_many_interfaces_use_distinct_xids() {
    let mut transport = MemoryTransport::new();
    let mut server = FakeServer::new();
    for i in 0..8u8 {
        server = server.lease(&format!("eth{i}"), Ipv4Addr::new(203, 0, 113, 10 + i));
    }
    server.install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 3));
    for i in 0..8u8 {
        coord.add_interface(iface(&format!("eth{i}"), i)).unwrap();
    }
    let outcomes = coord.run();
    assert!(outcomes.iter().all(|o| o.is_configured()));

    let xids: HashSet<u32> = (0..8)
        .map(|i| sent_messages(coord.transport(), &format!("eth{i}"))[0].xid)
        .collect();
    assert_eq!(xids.len(), 8);
}

#[test]
fn test_handles_closed_after_run() {
    let mut transport = MemoryTransport::new();
    FakeServer::new().lease("eth0", ADDR).install(&mut transport);

    let mut coord = coordinator(transport, fast_config(ProtocolMode::Dhcp, 2));
    coord.add_interface(iface("eth0", 1)).unwrap();
    coord.add_interface(iface("eth1", 2)).unwrap();
    coord.run();

    assert!(!coord.transport().is_open("eth0"));
    assert!(!coord.transport().is_open("eth1"));
    assert!(coord.is_finished());
}
