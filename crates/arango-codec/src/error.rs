//! Codec error types.

use thiserror::Error;

/// Errors that can occur while framing or parsing wire bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// IO error on the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level encoding or decoding failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] arango_protocol::ProtocolError),

    /// A chunk announced a length above the configured maximum.
    #[error("chunk too large: {size} bytes exceeds maximum {max}")]
    ChunkTooLarge {
        /// Announced size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the connection mid-frame.
    #[error("connection closed mid-frame")]
    ConnectionClosed,

    /// The HTTP response head could not be parsed.
    #[error("invalid response head: {0}")]
    InvalidHead(httparse::Error),

    /// The HTTP response head exceeded the size limit.
    #[error("response head too large")]
    HeadTooLarge,

    /// The server attempted a protocol upgrade, which is not supported.
    #[error("protocol upgrade refused")]
    UpgradeRefused,

    /// The `Content-Length` header was not a valid integer.
    #[error("invalid content length")]
    InvalidContentLength,

    /// The chunked transfer coding was malformed.
    #[error("invalid chunked body: {0}")]
    InvalidChunkedBody(&'static str),
}
