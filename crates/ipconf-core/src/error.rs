//! Error types for the ipconf negotiation core.

use crate::session::SessionState;
use ipconf_transport::TransportError;
use std::borrow::Cow;
use thiserror::Error;

/// Core errors
#[derive(Debug, Error)]
pub enum Error {
    /// Message failed decode validation
    #[error("malformed message: {0}")]
    Malformed(#[from] CodecError),

    /// Negotiation for one interface ended without a configuration
    #[error("negotiation failed: {0}")]
    NegotiationFailed(#[from] SessionError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Negotiation parameters are out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// The same interface was added twice
    #[error("interface {0} is already managed")]
    DuplicateInterface(String),
}

/// Decode validation failures. Any of these means the buffer is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer too short for the fixed header and magic cookie
    #[error("message too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Operation code is neither request nor reply
    #[error("invalid op code: {0}")]
    InvalidOpCode(u8),

    /// Hardware address length does not fit the chaddr field
    #[error("invalid hardware address length: {0}")]
    InvalidHardwareLength(u8),

    /// Magic cookie missing or wrong
    #[error("bad magic cookie: {}", hex::encode(.0))]
    BadMagicCookie([u8; 4]),

    /// Option length runs past the end of the buffer
    #[error("option {tag} at offset {offset} overruns the buffer")]
    OptionOverrun {
        /// Option tag
        tag: u8,
        /// Offset of the tag byte
        offset: usize,
    },

    /// Buffer ended before the END option
    #[error("missing end option")]
    MissingEnd,
}

/// Why a negotiation session ended without a configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The interface could not be attached to
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Every attempt on every allowed protocol went unanswered
    #[error("no usable reply after {attempts} attempts")]
    RetriesExhausted {
        /// Total transmissions made
        attempts: u32,
    },

    /// The global deadline passed before the session finished
    #[error("deadline expired while {0}")]
    DeadlineExpired(SessionState),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::BadMagicCookie([1, 2, 3, 4]);
        assert_eq!(err.to_string(), "bad magic cookie: 01020304");

        let err = CodecError::TooShort {
            expected: 240,
            actual: 12,
        };
        assert!(err.to_string().contains("240"));
    }

    #[test]
    fn test_error_from_conversions() {
        let err: Error = CodecError::MissingEnd.into();
        assert!(matches!(err, Error::Malformed(_)));

        let err: Error = SessionError::RetriesExhausted { attempts: 8 }.into();
        assert_eq!(
            err.to_string(),
            "negotiation failed: no usable reply after 8 attempts"
        );
    }

    #[test]
    fn test_deadline_error_names_state() {
        let err = SessionError::DeadlineExpired(SessionState::Offered);
        assert_eq!(err.to_string(), "deadline expired while offered");
    }
}
