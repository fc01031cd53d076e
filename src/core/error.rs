//! Error types for H-UDP.

use std::io;

use thiserror::Error;

/// Errors that can occur when framing an outbound payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Payload does not fit in a single datagram.
    #[error("payload too large: {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Largest allowed payload.
        max: usize,
    },
}

/// Errors that can occur when parsing an inbound datagram.
///
/// These never escape the receive loop: the offending datagram is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Datagram is shorter than the header it claims to carry.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Unknown channel-type tag.
    #[error("unknown channel type: 0x{0:02x}")]
    UnknownChannel(u8),

    /// Declared payload length disagrees with the bytes present.
    #[error("payload length mismatch: header says {expected}, but {actual} bytes available")]
    PayloadLengthMismatch {
        /// Payload length from the header.
        expected: usize,
        /// Payload bytes actually present.
        actual: usize,
    },
}

/// Errors in session configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The sender role needs somewhere to send.
    #[error("sender role requires a remote address")]
    MissingRemote,

    /// Window capacity outside `1..=32768`.
    #[error("invalid window capacity {0}: must be between 1 and {max}", max = super::MAX_WINDOW_CAPACITY)]
    InvalidWindow(u32),

    /// A duration option was zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// Delivery queue capacity was zero.
    #[error("delivery queue capacity must be greater than zero")]
    ZeroQueueCapacity,

    /// Receive buffer cannot hold a full frame.
    #[error("receive buffer of {0} bytes cannot hold a maximum-size frame")]
    RecvBufferTooSmall(usize),

    /// An option could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Option name.
        key: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Top-level H-UDP errors.
#[derive(Debug, Error)]
pub enum HudpError {
    /// Payload could not be framed.
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Datagram could not be parsed.
    #[error("decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// No room in the send window.
    #[error("send window full ({capacity} packets in flight)")]
    WindowFull {
        /// Configured window capacity.
        capacity: u16,
    },

    /// Transport-level failure.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// No data arrived before the deadline.
    #[error("receive timed out")]
    Timeout,

    /// Operation not available for this session's role.
    #[error("{operation} is not available on a {role} session")]
    WrongRole {
        /// The rejected operation.
        operation: &'static str,
        /// The session's role.
        role: &'static str,
    },

    /// Session is closed.
    #[error("session closed")]
    Closed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HudpError {
    /// Check if this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HudpError::Socket(_) | HudpError::Closed)
    }

    /// Check if this is the expected "no data yet" result of a receive.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HudpError::Timeout)
    }
}

/// Result type for H-UDP operations.
pub type HudpResult<T> = Result<T, HudpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(HudpError::Closed.is_fatal());
        assert!(HudpError::Socket(io::Error::new(io::ErrorKind::Other, "test")).is_fatal());

        assert!(!HudpError::Timeout.is_fatal());
        assert!(!HudpError::WindowFull { capacity: 32 }.is_fatal());
        assert!(!HudpError::Decode(DecodeError::UnknownChannel(9)).is_fatal());
    }

    #[test]
    fn test_timeout_classifier() {
        assert!(HudpError::Timeout.is_timeout());
        assert!(!HudpError::Closed.is_timeout());
    }

    #[test]
    fn test_error_messages() {
        let err = EncodeError::PayloadTooLarge { size: 2000, max: 1391 };
        assert_eq!(
            err.to_string(),
            "payload too large: 2000 bytes exceeds maximum of 1391"
        );

        let err = HudpError::WrongRole {
            operation: "send",
            role: "receiver",
        };
        assert_eq!(err.to_string(), "send is not available on a receiver session");

        let err = ConfigError::InvalidWindow(0);
        assert_eq!(
            err.to_string(),
            "invalid window capacity 0: must be between 1 and 32768"
        );
    }

    #[test]
    fn test_from_conversions() {
        let err: HudpError = DecodeError::UnknownChannel(0x7f).into();
        assert!(matches!(err, HudpError::Decode(DecodeError::UnknownChannel(0x7f))));

        let err: HudpError = ConfigError::MissingRemote.into();
        assert!(matches!(err, HudpError::Config(ConfigError::MissingRemote)));
    }
}
