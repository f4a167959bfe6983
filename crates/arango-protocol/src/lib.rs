//! # arango-protocol
//!
//! Pure implementation of the ArangoDB client wire protocols: HTTP/1.1
//! request framing and VelocyStream chunked messages.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic
//! and makes no assumptions about the async runtime. Higher-level crates
//! build upon this foundation to provide async I/O capabilities.
//!
//! Application payloads are opaque byte buffers throughout; only the fixed
//! VelocyStream *message header* array is VelocyPack-encoded, with the
//! minimal codec in [`vpack`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod http;
pub mod message;
pub mod types;
pub mod vpack;
pub mod vst;

pub use error::{ErrorCondition, ProtocolError, error_to_int, int_to_error};
pub use message::{MessageId, Request, RequestHeader, Response, ResponseHeader};
pub use types::{
    Authentication, ContentType, RestVerb, StatusCode, TransportProtocol, to_rest_verb, to_string,
};
pub use vst::{
    CHUNK_HEADER_SIZE_FIRST, CHUNK_HEADER_SIZE_FOLLOW, ChunkHeader, DEFAULT_MAX_CHUNK_SIZE,
    VstVersion,
};
