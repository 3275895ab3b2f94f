//! Session coordinator.
//!
//! Drives every interface's [`Session`] from one thread under one global
//! deadline. The coordinator exclusively owns the transport, its handles,
//! the clock and the transaction id pool; sessions only see decoded
//! messages and the current time.
//!
//! Each [`Coordinator::tick`]:
//!
//! 1. expires every unfinished session and releases all handles once the
//!    global deadline has passed
//! 2. sends whatever each session has due (start, request, retry)
//! 3. waits on each interface for at most the poll interval, bounded by the
//!    nearest retry deadline and the global deadline, and routes what
//!    arrives to that interface's session
//! 4. stops once every session is bound or failed

use crate::config::{NegotiationConfig, instant_after};
use crate::error::{Error, Result, SessionError};
use crate::lease::ConfigurationResult;
use crate::message::WireMessage;
use crate::session::{Disposition, Session, SessionState};
use crate::xid::XidPool;
use ipconf_transport::{Clock, Interface, PacketTransport, framing};
use std::time::{Duration, Instant};

/// Frames drained from one interface per tick
const MAX_FRAMES_PER_TICK: usize = 16;

/// Final result for one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceOutcome {
    /// Interface name
    pub interface: String,
    /// Configuration, or why there is none
    pub result: std::result::Result<ConfigurationResult, SessionError>,
}

impl InterfaceOutcome {
    /// Whether the interface was configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.result.is_ok()
    }
}

struct Slot<H> {
    interface: Interface,
    handle: Option<H>,
    session: Session,
    /// xid held in the pool on behalf of this session
    held_xid: Option<u32>,
}

/// Runs all negotiation sessions to completion
pub struct Coordinator<T: PacketTransport, C: Clock> {
    transport: T,
    clock: C,
    config: NegotiationConfig,
    xids: XidPool,
    slots: Vec<Slot<T::Handle>>,
    deadline: Option<Instant>,
    finished: bool,
}

impl<T: PacketTransport, C: Clock> Coordinator<T, C> {
    /// Create a coordinator.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `config` does not validate.
    pub fn new(transport: T, clock: C, config: NegotiationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            clock,
            config,
            xids: XidPool::new(),
            slots: Vec::new(),
            deadline: None,
            finished: false,
        })
    }

    /// Replace the transaction id source (deterministic simulations)
    #[must_use]
    pub fn with_xid_pool(mut self, xids: XidPool) -> Self {
        self.xids = xids;
        self
    }

    /// Manage `interface`. Its endpoint is opened immediately; an interface
    /// whose device is unavailable fails on its own without affecting the
    /// others.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateInterface` if the name is already managed.
    pub fn add_interface(&mut self, interface: Interface) -> Result<()> {
        if self.slots.iter().any(|s| s.interface.name == interface.name) {
            return Err(Error::DuplicateInterface(interface.name));
        }

        let mut session = Session::new(&interface, self.config.clone());
        let handle = match self.transport.open(&interface) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(interface = %interface.name, error = %e, "cannot open interface");
                session.fail_device(e.to_string());
                None
            }
        };

        tracing::debug!(
            interface = %interface.name,
            hwaddr = %interface.hwaddr,
            "managing interface"
        );
        self.slots.push(Slot {
            interface,
            handle,
            session,
            held_xid: None,
        });
        Ok(())
    }

    /// Session for `interface`
    #[must_use]
    pub fn session(&self, interface: &str) -> Option<&Session> {
        self.slots
            .iter()
            .find(|s| s.interface.name == interface)
            .map(|s| &s.session)
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Global deadline, fixed by the first tick
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the coordinator has stopped
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run one scheduling round. Returns `true` once negotiation is over.
    pub fn tick(&mut self) -> bool {
        if self.finished {
            return true;
        }

        let now = self.clock.now();
        let deadline = *self
            .deadline
            .get_or_insert_with(|| instant_after(now, self.config.global_deadline));

        if now >= deadline {
            tracing::warn!("global deadline reached");
            for slot in &mut self.slots {
                slot.session.expire();
            }
            self.finish();
            return true;
        }

        for index in 0..self.slots.len() {
            self.emit(index, now);
        }

        for index in 0..self.slots.len() {
            self.receive(index, deadline);
        }

        if self.slots.iter().all(|s| s.session.is_terminal()) {
            self.finish();
            return true;
        }
        false
    }

    /// Tick until every session has finished or the deadline passes, then
    /// report one outcome per interface in the order they were added.
    pub fn run(&mut self) -> Vec<InterfaceOutcome> {
        while !self.tick() {}
        self.outcomes()
    }

    /// Outcome per interface. Unfinished sessions report the state they
    /// were stuck in.
    #[must_use]
    pub fn outcomes(&self) -> Vec<InterfaceOutcome> {
        self.slots
            .iter()
            .map(|slot| InterfaceOutcome {
                interface: slot.interface.name.clone(),
                result: slot
                    .session
                    .outcome()
                    .unwrap_or(Err(SessionError::DeadlineExpired(slot.session.state()))),
            })
            .collect()
    }

    /// Send whatever the session at `index` has due
    fn emit(&mut self, index: usize, now: Instant) {
        let slot = &mut self.slots[index];
        let Some(handle) = slot.handle.as_ref() else {
            return;
        };

        if let Some(tx) = slot.session.poll(now, &mut self.xids) {
            slot.held_xid = slot.session.xid();
            if tx.new_xid {
                self.transport.discard(handle);
            }

            let payload = tx.message.encode();
            match framing::client_frame(&payload) {
                Ok(frame) => {
                    if let Err(e) = self.transport.send(handle, &frame) {
                        if e.is_transient() {
                            // The retry timer is already running; the next
                            // timeout resends.
                            tracing::warn!(
                                interface = %slot.interface.name,
                                error = %e,
                                "send failed"
                            );
                        } else {
                            tracing::warn!(interface = %slot.interface.name, error = %e, "interface lost");
                            slot.session.fail_device(e.to_string());
                        }
                    } else {
                        tracing::trace!(
                            interface = %slot.interface.name,
                            xid = format_args!("{:#010x}", tx.message.xid),
                            bytes = frame.len(),
                            "sent"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(interface = %slot.interface.name, error = %e, "cannot frame message");
                }
            }
        }

        self.retire_if_done(index);
    }

    /// Wait on the interface at `index` and route what arrives
    fn receive(&mut self, index: usize, deadline: Instant) {
        for _ in 0..MAX_FRAMES_PER_TICK {
            let slot = &self.slots[index];
            let Some(handle) = slot.handle.as_ref() else {
                return;
            };
            if slot.session.is_terminal() {
                return;
            }

            let now = self.clock.now();
            if now >= deadline {
                return;
            }
            let timeout = self.wait_budget(now, deadline);

            let frame = match self.transport.receive(handle, timeout) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(e) if e.is_transient() => {
                    tracing::warn!(interface = %slot.interface.name, error = %e, "receive failed");
                    return;
                }
                Err(e) => {
                    let slot = &mut self.slots[index];
                    tracing::warn!(interface = %slot.interface.name, error = %e, "interface lost");
                    slot.session.fail_device(e.to_string());
                    self.retire_if_done(index);
                    return;
                }
            };

            let accepted = self.route(index, &frame);

            // An accepted offer is answered without waiting for the next tick
            let now = self.clock.now();
            if accepted && now < deadline {
                self.emit(index, now);
            } else {
                self.retire_if_done(index);
            }
        }
    }

    /// Decode `frame` and hand it to the session at `index`
    fn route(&mut self, index: usize, frame: &[u8]) -> bool {
        let slot = &mut self.slots[index];
        let name = slot.interface.name.as_str();

        let payload = match framing::client_payload(frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(interface = name, error = %e, "dropping frame");
                return false;
            }
        };
        let msg = match WireMessage::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(interface = name, error = %e, "dropping malformed message");
                return false;
            }
        };

        let disposition = slot.session.handle_message(&msg);
        match disposition {
            Disposition::Accepted => {}
            Disposition::Spoofed => {
                tracing::debug!(
                    interface = name,
                    xid = format_args!("{:#010x}", msg.xid),
                    "reply for another hardware address"
                );
            }
            other => {
                tracing::trace!(
                    interface = name,
                    xid = format_args!("{:#010x}", msg.xid),
                    disposition = ?other,
                    "ignoring message"
                );
            }
        }
        disposition == Disposition::Accepted
    }

    /// How long one receive may block
    fn wait_budget(&self, now: Instant, deadline: Instant) -> Duration {
        let nearest_retry = self
            .slots
            .iter()
            .filter(|s| !s.session.is_terminal())
            .filter_map(|s| s.session.retry_deadline())
            .min();

        let mut budget = self.config.poll_interval.min(deadline - now);
        if let Some(retry) = nearest_retry {
            budget = budget.min(retry.saturating_duration_since(now));
        }
        // Offered and idle sessions have something to send right away
        if self.slots.iter().any(|s| {
            s.handle.is_some()
                && matches!(s.session.state(), SessionState::Idle | SessionState::Offered)
        }) {
            budget = Duration::ZERO;
        }
        budget
    }

    /// Release the handle and xid of a finished session
    fn retire_if_done(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if !slot.session.is_terminal() {
            return;
        }
        if let Some(xid) = slot.held_xid.take() {
            self.xids.release(xid);
        }
        if let Some(handle) = slot.handle.take() {
            self.transport.close(&handle);
        }
    }

    fn finish(&mut self) {
        for index in 0..self.slots.len() {
            self.retire_if_done(index);
        }
        // Expired sessions are terminal, so nothing stays open
        for slot in &mut self.slots {
            if let Some(handle) = slot.handle.take() {
                self.transport.close(&handle);
            }
        }
        self.finished = true;

        let configured = self.slots.iter().filter(|s| s.session.state() == SessionState::Bound).count();
        tracing::info!(
            configured,
            total = self.slots.len(),
            "negotiation finished"
        );
    }
}
