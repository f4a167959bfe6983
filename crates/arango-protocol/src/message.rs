//! Request and response message model.
//!
//! A [`Request`] is protocol-agnostic: the HTTP driver serializes it into a
//! request head (see [`crate::http`]), the VelocyStream driver into a chunked
//! message (see [`crate::vst`]). Payloads are opaque byte buffers; the driver
//! never inspects them.

use std::collections::HashMap;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::types::{ContentType, RestVerb, StatusCode};

/// Message id correlating a request with its response on one connection.
pub type MessageId = u64;

/// Header of an outgoing request.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    /// REST verb.
    pub rest_verb: RestVerb,
    /// Target database; `None` addresses the default `_system` database.
    pub database: Option<String>,
    /// Request path; must begin with `/`.
    pub path: String,
    /// Query parameters in submission order; duplicate keys are preserved.
    pub parameters: Vec<(String, String)>,
    /// Additional headers, emitted verbatim (name case as given).
    pub meta: HashMap<String, String>,
    /// Body content type.
    pub content_type: ContentType,
}

/// An outgoing request plus its payload buffers.
///
/// The payload is a sequence of byte buffers treated as a single octet
/// stream; [`Request::payload_size`] is its total length.
#[derive(Debug, Clone)]
pub struct Request {
    /// The request header.
    pub header: RequestHeader,
    /// Message id, assigned by the connection at submission time.
    pub message_id: MessageId,
    payload: SmallVec<[Bytes; 2]>,
}

impl Request {
    /// Create a request for `verb path` with no payload.
    #[must_use]
    pub fn new(verb: RestVerb, path: impl Into<String>) -> Self {
        Self {
            header: RequestHeader {
                rest_verb: verb,
                database: None,
                path: path.into(),
                parameters: Vec::new(),
                meta: HashMap::new(),
                content_type: ContentType::Unset,
            },
            message_id: 0,
            payload: SmallVec::new(),
        }
    }

    /// Shorthand for a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(RestVerb::Get, path)
    }

    /// Set the target database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.header.database = Some(database.into());
        self
    }

    /// Append a query parameter. Duplicates are kept in order.
    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.parameters.push((key.into(), value.into()));
        self
    }

    /// Set a meta header.
    #[must_use]
    pub fn meta(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.meta.insert(name.into(), value.into());
        self
    }

    /// Set the body content type.
    #[must_use]
    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.header.content_type = content_type;
        self
    }

    /// Append a payload buffer.
    #[must_use]
    pub fn payload(mut self, buffer: Bytes) -> Self {
        self.add_payload(buffer);
        self
    }

    /// Append a payload buffer in place.
    pub fn add_payload(&mut self, buffer: Bytes) {
        self.payload.push(buffer);
    }

    /// Total payload length in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.iter().map(Bytes::len).sum()
    }

    /// The payload buffers in order.
    #[must_use]
    pub fn payload_buffers(&self) -> &[Bytes] {
        &self.payload
    }
}

/// Header of a received response.
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    /// Status code in `[100, 599]`.
    pub status_code: StatusCode,
    /// Response headers (VelocyStream: meta entries of the message header).
    /// For duplicated names the last value wins.
    pub meta: HashMap<String, String>,
    /// Body content type, if announced.
    pub content_type: ContentType,
}

/// A complete response.
#[derive(Debug, Clone)]
pub struct Response {
    /// The response header.
    pub header: ResponseHeader,
    /// Message id; equals the id of the request this answers.
    pub message_id: MessageId,
    /// The response body.
    pub payload: Bytes,
}

impl Response {
    /// Create a response shell for `message_id` with an empty body.
    #[must_use]
    pub fn new(message_id: MessageId) -> Self {
        Self {
            header: ResponseHeader {
                status_code: 0,
                meta: HashMap::new(),
                content_type: ContentType::Unset,
            },
            message_id,
            payload: Bytes::new(),
        }
    }

    /// Whether the status code is in the 2xx class.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.header.status_code)
    }
}
