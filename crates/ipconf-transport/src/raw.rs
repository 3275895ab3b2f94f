//! Raw link-layer transport for Linux.
//!
//! Each managed interface gets an `AF_PACKET`/`SOCK_DGRAM` socket bound to
//! `ETH_P_IP` on that interface's index. The kernel adds and strips the
//! Ethernet header; everything above it (IPv4, UDP) is built by
//! [`crate::framing`]. Frames are always sent to the link broadcast address
//! since no neighbor is known before an address has been acquired.
//!
//! ## Requirements
//!
//! - `CAP_NET_RAW` (usually root in an initramfs)
//! - The interface must exist and be up

use crate::framing;
use crate::interface::{HardwareAddr, Interface};
use crate::transport::{PacketTransport, TransportError, TransportResult, TransportStats};
use socket2::{Domain, Protocol, Socket, Type};
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::os::raw::{c_int, c_void};
use std::time::{Duration, Instant};

/// Receive buffer size (large enough for any non-jumbo frame)
const RECV_BUFFER_SIZE: usize = 65536;

/// Handle to one raw endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(usize);

struct RawEndpoint {
    socket: Socket,
    ifindex: c_int,
    name: String,
}

/// Outcome of one non-blocking read
enum ReadOutcome {
    Frame(Vec<u8>),
    Filtered,
    Empty,
}

/// `AF_PACKET` transport
pub struct RawPacketTransport {
    endpoints: Vec<Option<RawEndpoint>>,
    recv_buf: Vec<u8>,
    stats: TransportStats,
}

impl RawPacketTransport {
    /// Create a transport with no open endpoints
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
            stats: TransportStats::new(),
        }
    }

    fn endpoint(&self, handle: &RawHandle) -> TransportResult<&RawEndpoint> {
        self.endpoints
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(TransportError::Closed)
    }

    /// Read at most one frame without blocking
    fn read_one(&mut self, handle: &RawHandle) -> io::Result<ReadOutcome> {
        let fd = match self.endpoint(handle) {
            Ok(endpoint) => endpoint.socket.as_raw_fd(),
            Err(_) => return Err(io::Error::from(io::ErrorKind::NotConnected)),
        };

        // SAFETY: sockaddr_ll is a plain C struct; all-zero is a valid value.
        let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

        // SAFETY: recv_buf is valid for RECV_BUFFER_SIZE bytes and `from` is a
        // properly sized out-parameter. MSG_DONTWAIT keeps the call non-blocking.
        let ret = unsafe {
            libc::recvfrom(
                fd,
                self.recv_buf.as_mut_ptr() as *mut c_void,
                self.recv_buf.len(),
                libc::MSG_DONTWAIT,
                &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut from_len,
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock => Ok(ReadOutcome::Empty),
                _ => Err(err),
            };
        }

        if !addressed_to_us(from.sll_pkttype) {
            return Ok(ReadOutcome::Filtered);
        }

        let frame = &self.recv_buf[..ret as usize];
        if framing::client_payload(frame).is_err() {
            return Ok(ReadOutcome::Filtered);
        }

        Ok(ReadOutcome::Frame(frame.to_vec()))
    }
}

impl Default for RawPacketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Our own transmissions and frames for other hosts are not for us
fn addressed_to_us(pkttype: u8) -> bool {
    pkttype != libc::PACKET_OUTGOING && pkttype != libc::PACKET_OTHERHOST
}

fn link_address(ifindex: c_int, hwaddr: Option<HardwareAddr>) -> libc::sockaddr_ll {
    // SAFETY: sockaddr_ll is a plain C struct; all-zero is a valid value.
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = (libc::ETH_P_IP as u16).to_be();
    addr.sll_ifindex = ifindex;
    if let Some(hwaddr) = hwaddr {
        addr.sll_halen = hwaddr.as_bytes().len() as u8;
        addr.sll_addr[..hwaddr.as_bytes().len()].copy_from_slice(hwaddr.as_bytes());
    }
    addr
}

impl PacketTransport for RawPacketTransport {
    type Handle = RawHandle;

    fn open(&mut self, interface: &Interface) -> TransportResult<RawHandle> {
        let name = interface.name.as_str();
        if !interface.is_up() {
            return Err(TransportError::unavailable(name, "link down"));
        }

        let c_name = CString::new(name)
            .map_err(|_| TransportError::unavailable(name, "invalid interface name"))?;
        // SAFETY: c_name is a valid NUL-terminated string for the duration of the call.
        let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        if ifindex == 0 {
            return Err(TransportError::unavailable(name, "no such device"));
        }
        let ifindex = ifindex as c_int;

        let protocol = Protocol::from(c_int::from((libc::ETH_P_IP as u16).to_be()));
        let socket = Socket::new(Domain::PACKET, Type::DGRAM, Some(protocol)).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                TransportError::unavailable(name, "permission denied (CAP_NET_RAW required)")
            } else {
                TransportError::unavailable(name, e.to_string())
            }
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::unavailable(name, e.to_string()))?;

        let addr = link_address(ifindex, None);
        // SAFETY: bind() is a standard POSIX syscall; addr is a fully initialized
        // sockaddr_ll and the length matches its size.
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::unavailable(
                name,
                io::Error::last_os_error().to_string(),
            ));
        }

        tracing::debug!(interface = name, ifindex, "raw endpoint open");

        let handle = RawHandle(self.endpoints.len());
        self.endpoints.push(Some(RawEndpoint {
            socket,
            ifindex,
            name: name.to_string(),
        }));
        Ok(handle)
    }

    fn send(&mut self, handle: &RawHandle, frame: &[u8]) -> TransportResult<()> {
        let endpoint = self.endpoint(handle)?;
        let dest = link_address(endpoint.ifindex, Some(HardwareAddr::BROADCAST));

        // SAFETY: sendto() is a standard POSIX syscall. `frame` is valid for its
        // length and `dest` is a fully initialized sockaddr_ll.
        let ret = unsafe {
            libc::sendto(
                endpoint.socket.as_raw_fd(),
                frame.as_ptr() as *const c_void,
                frame.len(),
                0,
                &dest as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };

        if ret < 0 {
            self.stats.record_send_error();
            return Err(TransportError::SendFailed(io::Error::last_os_error()));
        }

        self.stats.record_send(ret as usize);
        Ok(())
    }

    fn receive(
        &mut self,
        handle: &RawHandle,
        timeout: Duration,
    ) -> TransportResult<Option<Vec<u8>>> {
        let fd = self.endpoint(handle)?.socket.as_raw_fd();
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait_ms = remaining.as_micros().div_ceil(1000).min(c_int::MAX as u128) as c_int;

            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: poll() is a standard POSIX syscall on one valid pollfd.
            let ret = unsafe { libc::poll(&mut pfd, 1, wait_ms) };

            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.stats.record_recv_error();
                return Err(TransportError::ReceiveFailed(err));
            }
            if ret == 0 {
                return Ok(None);
            }

            match self.read_one(handle) {
                Ok(ReadOutcome::Frame(frame)) => {
                    self.stats.record_recv(frame.len());
                    return Ok(Some(frame));
                }
                Ok(ReadOutcome::Filtered) => self.stats.record_dropped(1),
                Ok(ReadOutcome::Empty) => {}
                Err(e) => {
                    self.stats.record_recv_error();
                    return Err(TransportError::ReceiveFailed(e));
                }
            }

            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }

    fn discard(&mut self, handle: &RawHandle) {
        let mut dropped = 0;
        while let Ok(ReadOutcome::Frame(_) | ReadOutcome::Filtered) = self.read_one(handle) {
            dropped += 1;
        }
        self.stats.record_dropped(dropped);
    }

    fn close(&mut self, handle: &RawHandle) {
        if let Some(endpoint) = self.endpoints.get_mut(handle.0).and_then(Option::take) {
            tracing::debug!(interface = %endpoint.name, "raw endpoint closed");
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
