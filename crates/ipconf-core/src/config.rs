//! Negotiation parameters.
//!
//! Retry ceiling, backoff shape and the global deadline are boot-environment
//! tuning knobs, so every one of them lives here rather than in the state
//! machine.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Upper bound on every timing parameter
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Which protocol variants a session may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    /// DHCP only
    Dhcp,
    /// BOOTP only
    Bootp,
    /// DHCP first, BOOTP once DHCP attempts run out
    #[default]
    #[serde(alias = "any")]
    Auto,
}

impl ProtocolMode {
    /// Protocol the first discovery uses
    #[must_use]
    pub fn initial_protocol(self) -> Protocol {
        match self {
            Self::Bootp => Protocol::Bootp,
            Self::Dhcp | Self::Auto => Protocol::Dhcp,
        }
    }

    /// Whether the DHCP to BOOTP downgrade is allowed
    #[must_use]
    pub fn allows_fallback(self) -> bool {
        self == Self::Auto
    }
}

impl FromStr for ProtocolMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dhcp" => Ok(Self::Dhcp),
            "bootp" => Ok(Self::Bootp),
            "any" | "auto" | "both" => Ok(Self::Auto),
            other => Err(Error::InvalidConfig(
                format!("unknown protocol mode: {other}").into(),
            )),
        }
    }
}

/// Protocol variant a session is currently speaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// DHCP (discover/offer/request/ack)
    Dhcp,
    /// BOOTP (single request/reply)
    Bootp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dhcp => f.write_str("dhcp"),
            Self::Bootp => f.write_str("bootp"),
        }
    }
}

/// Negotiation configuration
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationConfig {
    /// Allowed protocol variants
    pub mode: ProtocolMode,

    /// Wait before the first retransmission
    pub initial_timeout: Duration,

    /// Backoff multiplier applied after each unanswered attempt
    pub multiplier: f64,

    /// Upper bound on the retransmission interval
    pub max_backoff: Duration,

    /// Transmissions per protocol phase before giving up (or downgrading)
    pub max_attempts: u32,

    /// Longest single wait on one interface per coordinator tick
    pub poll_interval: Duration,

    /// Deadline for the whole negotiation, across all interfaces
    pub global_deadline: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            mode: ProtocolMode::Auto,
            initial_timeout: Duration::from_secs(2),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            max_attempts: 4,
            poll_interval: Duration::from_millis(100),
            global_deadline: Duration::from_secs(30),
        }
    }
}

impl NegotiationConfig {
    /// Interval that follows `current` after one more unanswered attempt
    #[must_use]
    pub fn next_backoff(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max_backoff, |next| next.min(self.max_backoff))
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.initial_timeout.is_zero() {
            return Err(Error::InvalidConfig("initial_timeout must be non-zero".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.max_backoff < self.initial_timeout {
            return Err(Error::InvalidConfig(
                "max_backoff must be >= initial_timeout".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll_interval must be non-zero".into()));
        }
        if self.global_deadline.is_zero() {
            return Err(Error::InvalidConfig("global_deadline must be non-zero".into()));
        }
        for (name, value) in [
            ("initial_timeout", self.initial_timeout),
            ("max_backoff", self.max_backoff),
            ("poll_interval", self.poll_interval),
            ("global_deadline", self.global_deadline),
        ] {
            if value > MAX_DURATION {
                return Err(Error::InvalidConfig(
                    format!("{name} must not exceed {}s", MAX_DURATION.as_secs()).into(),
                ));
            }
        }
        Ok(())
    }
}

/// `now + after`, clamped instead of overflowing the clock
pub(crate) fn instant_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(MAX_DURATION))
        .unwrap_or(now)
}
