//! In-memory packet transport.
//!
//! `MemoryTransport` stands in for raw sockets in tests and simulations.
//! Sent frames are recorded per interface, inbound frames are queued with a
//! delivery time, and an optional responder can answer sent frames the way a
//! server on the link would. Waiting in [`PacketTransport::receive`] advances
//! the shared [`ManualClock`] rather than sleeping, so a whole negotiation
//! with multi-second backoffs runs instantly and deterministically.

use crate::clock::{Clock, ManualClock};
use crate::framing;
use crate::interface::Interface;
use crate::transport::{PacketTransport, TransportError, TransportResult, TransportStats};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::{Duration, Instant};

/// Handle to one in-memory endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHandle(usize);

/// A frame a responder wants delivered back to the sending interface
#[derive(Debug, Clone)]
pub struct Reply {
    /// Delay after the triggering send
    pub delay: Duration,
    /// Frame to deliver
    pub frame: Vec<u8>,
}

impl Reply {
    /// Deliver immediately
    #[must_use]
    pub fn now(frame: Vec<u8>) -> Self {
        Self {
            delay: Duration::ZERO,
            frame,
        }
    }

    /// Deliver after `delay`
    #[must_use]
    pub fn after(delay: Duration, frame: Vec<u8>) -> Self {
        Self { delay, frame }
    }
}

/// Callback invoked for every successfully sent frame
pub type Responder = Box<dyn FnMut(&Interface, &[u8]) -> Vec<Reply>>;

#[derive(Debug)]
struct Pending {
    deliver_at: Instant,
    frame: Vec<u8>,
}

#[derive(Debug)]
struct Endpoint {
    interface: Interface,
    open: bool,
    inbox: VecDeque<Pending>,
    sent: Vec<Vec<u8>>,
}

impl Endpoint {
    fn enqueue(&mut self, deliver_at: Instant, frame: Vec<u8>) {
        // Keep delivery order stable for equal timestamps
        let pos = self
            .inbox
            .iter()
            .position(|p| p.deliver_at > deliver_at)
            .unwrap_or(self.inbox.len());
        self.inbox.insert(pos, Pending { deliver_at, frame });
    }
}

/// In-memory transport driven by a [`ManualClock`]
pub struct MemoryTransport {
    clock: ManualClock,
    endpoints: Vec<Endpoint>,
    by_name: HashMap<String, usize>,
    unavailable: HashMap<String, String>,
    failing_sends: HashMap<String, usize>,
    failing_receives: HashMap<String, usize>,
    responder: Option<Responder>,
    stats: TransportStats,
}

impl MemoryTransport {
    /// Create a transport with its own clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(ManualClock::new())
    }

    /// Create a transport sharing `clock`
    #[must_use]
    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            clock,
            endpoints: Vec::new(),
            by_name: HashMap::new(),
            unavailable: HashMap::new(),
            failing_sends: HashMap::new(),
            failing_receives: HashMap::new(),
            responder: None,
            stats: TransportStats::new(),
        }
    }

    /// The clock this transport advances
    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Install a responder called for every sent frame
    pub fn set_responder<F>(&mut self, responder: F)
    where
        F: FnMut(&Interface, &[u8]) -> Vec<Reply> + 'static,
    {
        self.responder = Some(Box::new(responder));
    }

    /// Make `interface` unusable. Later opens fail, and so does every send
    /// or receive on an endpoint that is already open.
    pub fn mark_unavailable(&mut self, interface: &str, reason: &str) {
        self.unavailable
            .insert(interface.to_string(), reason.to_string());
    }

    /// Make the next `count` sends on `interface` fail
    pub fn fail_sends(&mut self, interface: &str, count: usize) {
        self.failing_sends.insert(interface.to_string(), count);
    }

    /// Make the next `count` receives on `interface` fail
    pub fn fail_receives(&mut self, interface: &str, count: usize) {
        self.failing_receives.insert(interface.to_string(), count);
    }

    /// Queue a frame for immediate delivery on `interface`
    pub fn inject(&mut self, interface: &str, frame: Vec<u8>) {
        let now = self.clock.now();
        self.inject_at(interface, frame, now);
    }

    /// Queue a frame delivered on `interface` once the clock reaches `at`
    pub fn inject_at(&mut self, interface: &str, frame: Vec<u8>, at: Instant) {
        if let Some(endpoint) = self.endpoint_mut(interface) {
            endpoint.enqueue(at, frame);
        }
    }

    /// Frames sent on `interface`, oldest first
    #[must_use]
    pub fn sent_frames(&self, interface: &str) -> &[Vec<u8>] {
        self.endpoint(interface)
            .map(|e| e.sent.as_slice())
            .unwrap_or_default()
    }

    /// Number of queued inbound frames on `interface`
    #[must_use]
    pub fn pending(&self, interface: &str) -> usize {
        self.endpoint(interface).map_or(0, |e| e.inbox.len())
    }

    /// Whether `interface` currently has an open endpoint
    #[must_use]
    pub fn is_open(&self, interface: &str) -> bool {
        self.endpoint(interface).is_some_and(|e| e.open)
    }

    fn endpoint(&self, interface: &str) -> Option<&Endpoint> {
        self.by_name.get(interface).map(|&i| &self.endpoints[i])
    }

    fn endpoint_mut(&mut self, interface: &str) -> Option<&mut Endpoint> {
        self.by_name
            .get(interface)
            .copied()
            .map(|i| &mut self.endpoints[i])
    }

    /// Name of the open endpoint behind `handle`, unless it has been removed
    fn usable_name(&mut self, handle: &MemoryHandle) -> TransportResult<String> {
        let name = self.open_endpoint(handle)?.interface.name.clone();
        match self.unavailable.get(&name) {
            Some(reason) => Err(TransportError::unavailable(&name, reason.clone())),
            None => Ok(name),
        }
    }

    fn open_endpoint(&mut self, handle: &MemoryHandle) -> TransportResult<&mut Endpoint> {
        match self.endpoints.get_mut(handle.0) {
            Some(endpoint) if endpoint.open => Ok(endpoint),
            _ => Err(TransportError::Closed),
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketTransport for MemoryTransport {
    type Handle = MemoryHandle;

    fn open(&mut self, interface: &Interface) -> TransportResult<MemoryHandle> {
        if let Some(reason) = self.unavailable.get(&interface.name) {
            return Err(TransportError::unavailable(&interface.name, reason.clone()));
        }
        if !interface.is_up() {
            return Err(TransportError::unavailable(&interface.name, "link down"));
        }

        if let Some(&index) = self.by_name.get(&interface.name) {
            let endpoint = &mut self.endpoints[index];
            endpoint.interface = interface.clone();
            endpoint.open = true;
            return Ok(MemoryHandle(index));
        }

        let index = self.endpoints.len();
        self.endpoints.push(Endpoint {
            interface: interface.clone(),
            open: true,
            inbox: VecDeque::new(),
            sent: Vec::new(),
        });
        self.by_name.insert(interface.name.clone(), index);
        Ok(MemoryHandle(index))
    }

    fn send(&mut self, handle: &MemoryHandle, frame: &[u8]) -> TransportResult<()> {
        let name = self.usable_name(handle)?;

        if let Some(remaining) = self.failing_sends.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                self.stats.record_send_error();
                return Err(TransportError::SendFailed(io::Error::new(
                    io::ErrorKind::NetworkDown,
                    "simulated send failure",
                )));
            }
        }

        let now = self.clock.now();
        let endpoint = self.open_endpoint(handle)?;
        endpoint.sent.push(frame.to_vec());
        let interface = endpoint.interface.clone();
        self.stats.record_send(frame.len());

        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(&interface, frame);
            let endpoint = &mut self.endpoints[handle.0];
            for reply in replies {
                endpoint.enqueue(now + reply.delay, reply.frame);
            }
        }

        Ok(())
    }

    fn receive(
        &mut self,
        handle: &MemoryHandle,
        timeout: Duration,
    ) -> TransportResult<Option<Vec<u8>>> {
        let name = self.usable_name(handle)?;

        if let Some(remaining) = self.failing_receives.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                self.stats.record_recv_error();
                return Err(TransportError::ReceiveFailed(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "simulated receive failure",
                )));
            }
        }

        let deadline = self.clock.now() + timeout;
        let clock = self.clock.clone();
        let mut dropped = 0;

        let endpoint = self.open_endpoint(handle)?;
        let mut delivered = None;
        while let Some(next) = endpoint.inbox.front() {
            if next.deliver_at > deadline {
                break;
            }
            let Some(pending) = endpoint.inbox.pop_front() else {
                break;
            };
            clock.advance_to(pending.deliver_at);
            if framing::client_payload(&pending.frame).is_ok() {
                delivered = Some(pending.frame);
                break;
            }
            dropped += 1;
        }

        self.stats.record_dropped(dropped);
        match delivered {
            Some(frame) => {
                self.stats.record_recv(frame.len());
                Ok(Some(frame))
            }
            None => {
                clock.advance_to(deadline);
                Ok(None)
            }
        }
    }

    fn discard(&mut self, handle: &MemoryHandle) {
        let now = self.clock.now();
        let Ok(endpoint) = self.open_endpoint(handle) else {
            return;
        };
        let before = endpoint.inbox.len();
        endpoint.inbox.retain(|p| p.deliver_at > now);
        let dropped = before - endpoint.inbox.len();
        self.stats.record_dropped(dropped);
    }

    fn close(&mut self, handle: &MemoryHandle) {
        if let Some(endpoint) = self.endpoints.get_mut(handle.0) {
            endpoint.open = false;
            endpoint.inbox.clear();
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
