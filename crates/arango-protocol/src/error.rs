//! Error conditions and protocol-level parse errors.

use thiserror::Error;

/// The closed set of transport error conditions reported through request
/// callbacks and the connection failure callback.
///
/// The numeric values are stable and form the wire-independent contract of
/// the driver: `0` is success, `1000`-range values are transport failures,
/// `3000` marks a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCondition {
    /// Success.
    NoError = 0,
    /// Resolution, TCP connect or TLS handshake failed.
    CouldNotConnect = 1000,
    /// The established connection failed while in use.
    ConnectionError = 1001,
    /// An operation exceeded its deadline.
    Timeout = 1002,
    /// The request was canceled before completion (connection shut down).
    Canceled = 1003,
    /// The bounded write queue was full at submission time.
    QueueCapacityExceeded = 1004,
    /// A socket read failed (HTTP).
    ReadError = 1102,
    /// A socket write failed (HTTP).
    WriteError = 1103,
    /// A socket read failed (VelocyStream).
    VstReadError = 1104,
    /// A socket write failed (VelocyStream).
    VstWriteError = 1105,
    /// The peer violated the wire protocol.
    ProtocolError = 3000,
}

impl ErrorCondition {
    /// Human-readable description of the condition.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::CouldNotConnect => "unable to connect",
            Self::ConnectionError => "connection error",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::QueueCapacityExceeded => "write queue capacity exceeded",
            Self::ReadError => "read error",
            Self::WriteError => "write error",
            Self::VstReadError => "vst read error",
            Self::VstWriteError => "vst write error",
            Self::ProtocolError => "protocol error",
        }
    }
}

impl core::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}

/// Map an error integer back onto its [`ErrorCondition`].
///
/// Integers outside the closed set collapse to
/// [`ErrorCondition::ProtocolError`].
#[must_use]
pub fn int_to_error(code: u32) -> ErrorCondition {
    match code {
        0 => ErrorCondition::NoError,
        1000 => ErrorCondition::CouldNotConnect,
        1001 => ErrorCondition::ConnectionError,
        1002 => ErrorCondition::Timeout,
        1003 => ErrorCondition::Canceled,
        1004 => ErrorCondition::QueueCapacityExceeded,
        1102 => ErrorCondition::ReadError,
        1103 => ErrorCondition::WriteError,
        1104 => ErrorCondition::VstReadError,
        1105 => ErrorCondition::VstWriteError,
        _ => ErrorCondition::ProtocolError,
    }
}

/// The error integer for a condition.
#[must_use]
pub const fn error_to_int(condition: ErrorCondition) -> u32 {
    condition as u32
}

/// Errors raised while encoding or decoding wire bytes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A verb name could not be parsed.
    #[error("invalid REST verb: {0}")]
    InvalidVerb(String),

    /// A request path did not start with '/'.
    #[error("request path must begin with '/': {0}")]
    InvalidPath(String),

    /// A chunk header field is out of range or inconsistent.
    #[error("invalid chunk header: {0}")]
    InvalidChunk(&'static str),

    /// A chunk or message exceeds the configured maximum.
    #[error("chunk too large: {size} bytes exceeds maximum {max}")]
    ChunkTooLarge {
        /// Observed size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Truncated input while a fixed-size structure was expected.
    #[error("incomplete data: expected {expected} bytes, got {actual}")]
    Incomplete {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// VelocyPack data could not be encoded or decoded.
    #[error("velocypack error: {0}")]
    VPack(&'static str),

    /// A VelocyStream message header did not have the expected shape.
    #[error("malformed message header: {0}")]
    MalformedHeader(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_int_round_trip() {
        for condition in [
            ErrorCondition::NoError,
            ErrorCondition::CouldNotConnect,
            ErrorCondition::ConnectionError,
            ErrorCondition::Timeout,
            ErrorCondition::Canceled,
            ErrorCondition::QueueCapacityExceeded,
            ErrorCondition::ReadError,
            ErrorCondition::WriteError,
            ErrorCondition::VstReadError,
            ErrorCondition::VstWriteError,
            ErrorCondition::ProtocolError,
        ] {
            assert_eq!(int_to_error(error_to_int(condition)), condition);
        }
    }

    #[test]
    fn test_unknown_int_is_protocol_error() {
        assert_eq!(int_to_error(42), ErrorCondition::ProtocolError);
        assert_eq!(int_to_error(u32::MAX), ErrorCondition::ProtocolError);
    }
}
