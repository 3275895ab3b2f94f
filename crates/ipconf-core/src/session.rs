//! Per-interface negotiation state machine.
//!
//! A [`Session`] never touches the network. The coordinator asks it for due
//! transmissions with [`Session::poll`], sends them, and feeds decoded replies
//! back through [`Session::handle_message`]. Time is passed in explicitly.
//!
//! ```text
//! Idle        -> Discovering            start (fresh xid)
//! Discovering -> Offered                DHCP offer
//! Discovering -> Bound                  BOOTP reply
//! Discovering -> Discovering            DHCP attempts exhausted, downgrade to BOOTP
//! Offered     -> Requesting             request sent immediately
//! Requesting  -> Bound                  ack
//! Requesting  -> Idle                   nak, discovery restarts
//! Requesting  -> Discovering            DHCP attempts exhausted, downgrade to BOOTP
//! *           -> Failed                 retries exhausted, deadline, device gone
//! ```

use crate::config::{NegotiationConfig, Protocol, instant_after};
use crate::error::SessionError;
use crate::lease::ConfigurationResult;
use crate::message::{OpCode, WireMessage};
use crate::options::MessageType;
use crate::xid::XidPool;
use ipconf_transport::{HardwareAddr, Interface};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not started, or restarting after a NAK
    Idle,
    /// Discovery sent, waiting for an offer (or BOOTP reply)
    Discovering,
    /// Offer accepted, request not yet sent
    Offered,
    /// Request sent, waiting for acknowledgment
    Requesting,
    /// Configuration acquired
    Bound,
    /// Negotiation gave up
    Failed,
}

impl SessionState {
    /// Bound and Failed end the session
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Bound | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Offered => "offered",
            Self::Requesting => "requesting",
            Self::Bound => "bound",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a session did with a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The message advanced the session
    Accepted,
    /// Transaction id does not match, or nothing is outstanding
    Stale,
    /// Transaction id matches but the hardware address does not
    Spoofed,
    /// Right transaction, wrong kind of message for the current state
    Unexpected,
    /// Offer or reply with an unusable address
    Unacceptable,
}

/// A message the session wants sent now
#[derive(Debug, Clone)]
pub struct Transmit {
    /// Message to encode and send
    pub message: WireMessage,
    /// The transaction id changed; replies to the old one are now stale
    pub new_xid: bool,
}

/// Per-interface negotiation session
#[derive(Debug)]
pub struct Session {
    interface: String,
    hwaddr: HardwareAddr,
    config: NegotiationConfig,
    state: SessionState,
    protocol: Protocol,
    downgraded: bool,
    xid: Option<u32>,
    attempts: u32,
    total_attempts: u32,
    backoff: Duration,
    retry_at: Option<Instant>,
    started_at: Option<Instant>,
    offer: Option<WireMessage>,
    result: Option<ConfigurationResult>,
    failure: Option<SessionError>,
}

impl Session {
    /// Create an idle session for `interface`
    #[must_use]
    pub fn new(interface: &Interface, config: NegotiationConfig) -> Self {
        Self {
            interface: interface.name.clone(),
            hwaddr: interface.hwaddr,
            protocol: config.mode.initial_protocol(),
            backoff: config.initial_timeout,
            config,
            state: SessionState::Idle,
            downgraded: false,
            xid: None,
            attempts: 0,
            total_attempts: 0,
            retry_at: None,
            started_at: None,
            offer: None,
            result: None,
            failure: None,
        }
    }

    /// Interface name
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Protocol variant in use
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Current transaction id
    #[must_use]
    pub fn xid(&self) -> Option<u32> {
        self.xid
    }

    /// Transmissions in the current phase
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current retransmission interval
    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// When the next retransmission is due, if one is scheduled
    #[must_use]
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Whether the session has downgraded to BOOTP
    #[must_use]
    pub fn downgraded(&self) -> bool {
        self.downgraded
    }

    /// The offer being requested, if any
    #[must_use]
    pub fn offer(&self) -> Option<&WireMessage> {
        self.offer.as_ref()
    }

    /// Acquired configuration
    #[must_use]
    pub fn result(&self) -> Option<&ConfigurationResult> {
        self.result.as_ref()
    }

    /// Failure reason
    #[must_use]
    pub fn failure(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    /// Whether the session has finished
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(&self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self.state, to),
            (Idle, Discovering | Failed)
                | (Discovering, Discovering | Offered | Bound | Failed)
                | (Offered, Requesting | Failed)
                | (Requesting, Bound | Idle | Discovering | Failed)
        )
    }

    fn transition_to(&mut self, next: SessionState) {
        debug_assert!(
            self.can_transition(next),
            "invalid transition {} -> {next}",
            self.state
        );
        tracing::debug!(
            interface = %self.interface,
            "Session state transition: {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Begin (or restart) discovery with a fresh transaction id
    pub fn start(&mut self, now: Instant, xids: &mut XidPool) -> Transmit {
        self.started_at.get_or_insert(now);
        self.renew_xid(xids);
        self.offer = None;
        self.attempts = 0;
        self.backoff = self.config.initial_timeout;
        self.transition_to(SessionState::Discovering);
        self.transmit(now, true)
    }

    /// Return the transmission due at `now`, if any.
    ///
    /// Idle sessions start, offered sessions send their request, and
    /// outstanding exchanges whose retry deadline has passed time out.
    pub fn poll(&mut self, now: Instant, xids: &mut XidPool) -> Option<Transmit> {
        match self.state {
            SessionState::Idle => Some(self.start(now, xids)),
            SessionState::Offered => {
                self.attempts = 0;
                self.backoff = self.config.initial_timeout;
                self.transition_to(SessionState::Requesting);
                Some(self.transmit(now, false))
            }
            SessionState::Discovering | SessionState::Requesting => match self.retry_at {
                Some(at) if now >= at => self.on_timeout(now, xids),
                _ => None,
            },
            SessionState::Bound | SessionState::Failed => None,
        }
    }

    /// Retry deadline expired: resend, downgrade, or fail
    pub fn on_timeout(&mut self, now: Instant, xids: &mut XidPool) -> Option<Transmit> {
        if self.attempts < self.config.max_attempts {
            self.backoff = self.config.next_backoff(self.backoff);
            tracing::debug!(
                interface = %self.interface,
                state = %self.state,
                attempt = self.attempts + 1,
                backoff_ms = self.backoff.as_millis() as u64,
                "retransmitting"
            );
            return Some(self.transmit(now, false));
        }

        if self.protocol == Protocol::Dhcp && self.config.mode.allows_fallback() && !self.downgraded
        {
            tracing::info!(
                interface = %self.interface,
                attempts = self.attempts,
                "no DHCP reply, falling back to BOOTP"
            );
            self.protocol = Protocol::Bootp;
            self.downgraded = true;
            self.renew_xid(xids);
            self.offer = None;
            self.attempts = 0;
            self.backoff = self.config.initial_timeout;
            self.transition_to(SessionState::Discovering);
            return Some(self.transmit(now, true));
        }

        tracing::warn!(
            interface = %self.interface,
            state = %self.state,
            attempts = self.total_attempts,
            "negotiation failed"
        );
        self.fail(SessionError::RetriesExhausted {
            attempts: self.total_attempts,
        });
        None
    }

    /// Apply a decoded message addressed to this interface
    pub fn handle_message(&mut self, msg: &WireMessage) -> Disposition {
        let outstanding = matches!(
            self.state,
            SessionState::Discovering | SessionState::Requesting
        );
        if !outstanding || self.xid != Some(msg.xid) || msg.op != OpCode::BootReply {
            return Disposition::Stale;
        }
        if msg.hwaddr() != Some(self.hwaddr) {
            return Disposition::Spoofed;
        }

        match (self.state, self.protocol) {
            (SessionState::Discovering, Protocol::Dhcp) => self.on_offer(msg),
            (SessionState::Discovering, Protocol::Bootp) => self.on_bootp_reply(msg),
            (SessionState::Requesting, _) => self.on_request_reply(msg),
            _ => Disposition::Stale,
        }
    }

    /// Force the session to fail because the global deadline passed
    pub fn expire(&mut self) {
        if !self.is_terminal() {
            tracing::warn!(
                interface = %self.interface,
                state = %self.state,
                "deadline expired"
            );
            self.fail(SessionError::DeadlineExpired(self.state));
        }
    }

    /// Fail the session because its device cannot be used
    pub fn fail_device(&mut self, reason: impl Into<String>) {
        if !self.is_terminal() {
            self.fail(SessionError::DeviceUnavailable(reason.into()));
        }
    }

    /// Final outcome, once terminal
    #[must_use]
    pub fn outcome(&self) -> Option<Result<ConfigurationResult, SessionError>> {
        match self.state {
            SessionState::Bound => self.result.clone().map(Ok),
            SessionState::Failed => self.failure.clone().map(Err),
            _ => None,
        }
    }

    fn on_offer(&mut self, msg: &WireMessage) -> Disposition {
        if msg.message_type() != Some(MessageType::Offer) {
            return Disposition::Unexpected;
        }
        if !acceptable_address(msg.yiaddr) {
            tracing::debug!(interface = %self.interface, addr = %msg.yiaddr, "rejecting offer");
            return Disposition::Unacceptable;
        }

        tracing::debug!(
            interface = %self.interface,
            addr = %msg.yiaddr,
            server = ?msg.server_id(),
            "offer received"
        );
        self.offer = Some(msg.clone());
        self.retry_at = None;
        self.transition_to(SessionState::Offered);
        Disposition::Accepted
    }

    fn on_bootp_reply(&mut self, msg: &WireMessage) -> Disposition {
        if msg.message_type().is_some() {
            return Disposition::Unexpected;
        }
        if !acceptable_address(msg.yiaddr) {
            return Disposition::Unacceptable;
        }
        self.bind(ConfigurationResult::from_reply(
            &self.interface,
            Protocol::Bootp,
            msg,
            None,
        ));
        Disposition::Accepted
    }

    fn on_request_reply(&mut self, msg: &WireMessage) -> Disposition {
        let offered_by = self.offer.as_ref().and_then(WireMessage::server_id);
        if let (Some(expected), Some(actual)) = (offered_by, msg.server_id()) {
            if expected != actual {
                return Disposition::Unexpected;
            }
        }

        match msg.message_type() {
            Some(MessageType::Ack) => {
                let result = ConfigurationResult::from_reply(
                    &self.interface,
                    Protocol::Dhcp,
                    msg,
                    self.offer.as_ref(),
                );
                if !acceptable_address(result.address) {
                    return Disposition::Unacceptable;
                }
                self.bind(result);
                Disposition::Accepted
            }
            Some(MessageType::Nak) => {
                tracing::info!(
                    interface = %self.interface,
                    reason = ?msg.string_option(crate::options::tag::MESSAGE),
                    "request refused, restarting discovery"
                );
                self.offer = None;
                self.retry_at = None;
                self.transition_to(SessionState::Idle);
                Disposition::Accepted
            }
            _ => Disposition::Unexpected,
        }
    }

    fn bind(&mut self, result: ConfigurationResult) {
        tracing::info!(
            interface = %self.interface,
            protocol = %result.protocol,
            address = %result.address,
            prefix = result.prefix_len,
            lease_secs = result.lease_secs,
            "configuration acquired"
        );
        self.retry_at = None;
        self.result = Some(result);
        self.transition_to(SessionState::Bound);
    }

    fn fail(&mut self, reason: SessionError) {
        self.retry_at = None;
        self.failure = Some(reason);
        self.transition_to(SessionState::Failed);
    }

    fn renew_xid(&mut self, xids: &mut XidPool) {
        if let Some(old) = self.xid.take() {
            xids.release(old);
        }
        self.xid = Some(xids.allocate());
    }

    /// Build the message for the current state and schedule its retry
    fn transmit(&mut self, now: Instant, new_xid: bool) -> Transmit {
        let xid = self.xid.unwrap_or_default();
        let mut message = match (self.state, self.protocol, &self.offer) {
            (SessionState::Requesting, _, Some(offer)) => {
                WireMessage::dhcp_request(xid, self.hwaddr, offer.yiaddr, offer.server_id())
            }
            (_, Protocol::Bootp, _) => WireMessage::bootp_request(xid, self.hwaddr),
            _ => WireMessage::discover(xid, self.hwaddr),
        };
        let elapsed = self
            .started_at
            .map_or(Duration::ZERO, |start| now.saturating_duration_since(start));
        message.secs = u16::try_from(elapsed.as_secs()).unwrap_or(u16::MAX);

        self.attempts += 1;
        self.total_attempts += 1;
        self.retry_at = Some(instant_after(now, self.backoff));
        Transmit { message, new_xid }
    }
}

/// Whether a server-proposed address can be assigned to an interface
fn acceptable_address(addr: Ipv4Addr) -> bool {
    !(addr.is_unspecified() || addr.is_broadcast() || addr.is_multicast() || addr.is_loopback())
}
