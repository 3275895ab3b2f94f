//! # ipconf Core
//!
//! Protocol core of the ipconf early-boot address-configuration client.
//!
//! This crate provides:
//! - BOOTP/DHCP message encoding and decoding
//! - The per-interface negotiation state machine, including the DHCP to
//!   BOOTP downgrade
//! - A single-threaded coordinator that runs every interface under one
//!   global deadline
//! - Configuration results in the `KEY=value` form boot scripts consume
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Coordinator                               │
//! │   (polling loop, global deadline, transaction id pool)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    Session (per interface)                       │
//! │   (discover/offer/request/ack, retries, BOOTP fallback)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                        WireMessage                               │
//! │   (236-byte header, magic cookie, TLV options)                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  PacketTransport (ipconf-transport)              │
//! │   (raw link-layer frames, IPv4/UDP encapsulation)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sessions never touch the network. The coordinator owns the transport
//! and the clock, so a full negotiation can be simulated with
//! [`ipconf_transport::MemoryTransport`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod lease;
pub mod message;
pub mod options;
pub mod session;
pub mod xid;

pub use config::{NegotiationConfig, Protocol, ProtocolMode};
pub use coordinator::{Coordinator, InterfaceOutcome};
pub use error::{CodecError, Error, Result, SessionError};
pub use lease::ConfigurationResult;
pub use message::{OpCode, WireMessage};
pub use options::{DhcpOption, MessageType};
pub use session::{Disposition, Session, SessionState, Transmit};
pub use xid::XidPool;

/// Well-known BOOTP server port
pub const SERVER_PORT: u16 = ipconf_transport::framing::SERVER_PORT;

/// Well-known BOOTP client port
pub const CLIENT_PORT: u16 = ipconf_transport::framing::CLIENT_PORT;
