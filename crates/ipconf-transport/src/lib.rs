//! # ipconf Transport
//!
//! Link-layer packet transport for the ipconf address-configuration client.
//!
//! This crate provides:
//! - The [`PacketTransport`] trait the negotiation core is generic over
//! - Raw `AF_PACKET` endpoints for Linux ([`RawPacketTransport`])
//! - Hand-built IPv4/UDP framing with checksum validation
//! - An in-memory transport and manual clock for deterministic simulation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod clock;
pub mod framing;
pub mod interface;
pub mod memory;
pub mod transport;

// AF_PACKET sockets are Linux-specific
#[cfg(target_os = "linux")]
pub mod raw;

pub use clock::{Clock, ManualClock, SystemClock};
pub use framing::{Datagram, FramingError};
pub use interface::{HardwareAddr, Interface, LinkState, ParseHardwareAddrError};
pub use memory::{MemoryHandle, MemoryTransport, Reply, Responder};
pub use transport::{PacketTransport, TransportError, TransportResult, TransportStats};

#[cfg(target_os = "linux")]
pub use raw::{RawHandle, RawPacketTransport};
