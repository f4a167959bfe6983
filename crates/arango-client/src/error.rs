//! Client error types.

use arango_protocol::ErrorCondition;
use thiserror::Error;

/// Errors surfaced through request callbacks, the synchronous façade and
/// the builder.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection URL or builder options are invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Host resolution, TCP connect or the TLS handshake failed.
    #[error("could not connect: {0}")]
    CouldNotConnect(String),

    /// The established connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation exceeded its deadline.
    #[error("timeout")]
    Timeout,

    /// The request was canceled because the connection shut down.
    #[error("request canceled")]
    Canceled,

    /// The bounded write queue was full; the request was never registered.
    #[error("write queue capacity exceeded")]
    QueueCapacityExceeded,

    /// A socket read failed (HTTP).
    #[error("read error: {0}")]
    Read(String),

    /// A socket write failed (HTTP).
    #[error("write error: {0}")]
    Write(String),

    /// A socket read failed (VelocyStream).
    #[error("vst read error: {0}")]
    VstRead(String),

    /// A socket write failed (VelocyStream).
    #[error("vst write error: {0}")]
    VstWrite(String),

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// The transport error condition this error maps onto.
    ///
    /// Builder-time [`Error::Config`] has no transport counterpart and maps
    /// to [`ErrorCondition::ProtocolError`].
    #[must_use]
    pub fn condition(&self) -> ErrorCondition {
        match self {
            Self::Config(_) | Self::Protocol(_) => ErrorCondition::ProtocolError,
            Self::CouldNotConnect(_) => ErrorCondition::CouldNotConnect,
            Self::Connection(_) => ErrorCondition::ConnectionError,
            Self::Timeout => ErrorCondition::Timeout,
            Self::Canceled => ErrorCondition::Canceled,
            Self::QueueCapacityExceeded => ErrorCondition::QueueCapacityExceeded,
            Self::Read(_) => ErrorCondition::ReadError,
            Self::Write(_) => ErrorCondition::WriteError,
            Self::VstRead(_) => ErrorCondition::VstReadError,
            Self::VstWrite(_) => ErrorCondition::VstWriteError,
        }
    }

    /// Build the error matching a transport condition.
    pub(crate) fn from_condition(condition: ErrorCondition, message: impl Into<String>) -> Self {
        let message = message.into();
        match condition {
            ErrorCondition::NoError | ErrorCondition::ProtocolError => Self::Protocol(message),
            ErrorCondition::CouldNotConnect => Self::CouldNotConnect(message),
            ErrorCondition::ConnectionError => Self::Connection(message),
            ErrorCondition::Timeout => Self::Timeout,
            ErrorCondition::Canceled => Self::Canceled,
            ErrorCondition::QueueCapacityExceeded => Self::QueueCapacityExceeded,
            ErrorCondition::ReadError => Self::Read(message),
            ErrorCondition::WriteError => Self::Write(message),
            ErrorCondition::VstReadError => Self::VstRead(message),
            ErrorCondition::VstWriteError => Self::VstWrite(message),
        }
    }
}

impl From<arango_protocol::ProtocolError> for Error {
    fn from(e: arango_protocol::ProtocolError) -> Self {
        Error::Protocol(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_mapping() {
        assert_eq!(
            Error::QueueCapacityExceeded.condition(),
            ErrorCondition::QueueCapacityExceeded
        );
        assert_eq!(Error::Canceled.condition(), ErrorCondition::Canceled);
        assert_eq!(
            Error::Config("bad".into()).condition(),
            ErrorCondition::ProtocolError
        );
    }

    #[test]
    fn test_from_condition_round_trip() {
        for condition in [
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
            let error = Error::from_condition(condition, "x");
            assert_eq!(error.condition(), condition);
        }
    }
}
