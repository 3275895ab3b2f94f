//! Packet transport trait abstraction.
//!
//! This module defines the `PacketTransport` trait the negotiation core is
//! polymorphic over. A transport owns one raw link-layer endpoint per managed
//! interface and moves whole IPv4/UDP frames; it never retries on its own.
//! Retry policy belongs to the negotiation session.

use crate::interface::Interface;
use std::io;
use std::time::Duration;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The interface cannot be attached to (no such device, permission
    /// denied, link down). Fatal for that interface only.
    #[error("device {interface} unavailable: {reason}")]
    DeviceUnavailable {
        /// Interface name
        interface: String,
        /// Human-readable cause
        reason: String,
    },

    /// Transmitting a frame failed
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    /// Waiting for or reading a frame failed
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// The handle was closed or never opened by this transport
    #[error("transport handle is closed")]
    Closed,
}

impl TransportError {
    /// Create a `DeviceUnavailable` error
    pub fn unavailable(interface: &str, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            interface: interface.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true for faults the caller may recover from by retrying later
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SendFailed(_) | Self::ReceiveFailed(_))
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Raw link-layer packet transport.
///
/// Every operation takes the handle returned by [`PacketTransport::open`].
/// Handles are owned by the caller (the session coordinator) and are only
/// ever passed back by reference.
///
/// # Examples
///
/// ```
/// use ipconf_transport::{HardwareAddr, Interface, MemoryTransport, PacketTransport};
/// use std::time::Duration;
///
/// let mut transport = MemoryTransport::new();
/// let iface = Interface::new("eth0", HardwareAddr::new([2, 0, 0, 0, 0, 1]));
/// let handle = transport.open(&iface).unwrap();
///
/// transport.send(&handle, b"frame").unwrap();
/// assert!(transport.receive(&handle, Duration::ZERO).unwrap().is_none());
///
/// transport.close(&handle);
/// transport.close(&handle); // idempotent
/// ```
pub trait PacketTransport {
    /// Opaque per-interface endpoint handle
    type Handle;

    /// Attach to one interface's link layer.
    ///
    /// # Errors
    /// Returns `TransportError::DeviceUnavailable` if the interface cannot
    /// be attached to.
    fn open(&mut self, interface: &Interface) -> TransportResult<Self::Handle>;

    /// Transmit one fully formed frame.
    ///
    /// # Errors
    /// Returns `TransportError::SendFailed` on failure. The frame is not
    /// retried.
    fn send(&mut self, handle: &Self::Handle, frame: &[u8]) -> TransportResult<()>;

    /// Wait up to `timeout` for the next inbound frame that passes the
    /// protocol filter. `Ok(None)` means the timeout elapsed.
    ///
    /// # Errors
    /// Returns `TransportError::ReceiveFailed` if waiting or reading fails.
    fn receive(&mut self, handle: &Self::Handle, timeout: Duration)
    -> TransportResult<Option<Vec<u8>>>;

    /// Drop any buffered but unconsumed inbound frames.
    fn discard(&mut self, handle: &Self::Handle);

    /// Release the endpoint. Closing twice is a no-op.
    fn close(&mut self, handle: &Self::Handle);

    /// Transport statistics
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total packets sent
    pub packets_sent: u64,
    /// Total packets received
    pub packets_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
    /// Frames dropped by the protocol filter or `discard`
    pub dropped: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
    }

    /// Record a successful receive
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.packets_received += 1;
    }

    /// Record a send error
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }

    /// Record a receive error
    pub fn record_recv_error(&mut self) {
        self.recv_errors += 1;
    }

    /// Record dropped frames
    pub fn record_dropped(&mut self, count: usize) {
        self.dropped += count as u64;
    }
}
