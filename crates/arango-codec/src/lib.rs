//! # arango-codec
//!
//! Async framing layer for ArangoDB client connections.
//!
//! This crate transforms raw byte streams into protocol frames for both
//! wire protocols the driver speaks:
//!
//! - VelocyStream: chunk framing via [`VstCodec`] with split
//!   [`ChunkReader`]/[`ChunkWriter`] streams and per-message-id reassembly
//!   through [`MessageAssembler`]. Chunks of different messages interleave
//!   freely on a full-duplex connection.
//! - HTTP/1.1: streaming response decoding via [`HttpResponseDecoder`]
//!   (httparse head parsing, `Content-Length` and chunked body framing,
//!   strict rejection of malformed heads and protocol upgrades).
//!
//! ## Architecture
//!
//! ```text
//! TCP/TLS stream → VstCodec (chunk framing) → MessageAssembler → driver
//! TCP/TLS stream → HttpResponseDecoder ———————————————————————→ driver
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod assembler;
pub mod chunk_codec;
pub mod error;
pub mod framed;
pub mod http_decoder;

pub use assembler::{MessageAssembler, VstMessage};
pub use chunk_codec::{Chunk, VstCodec};
pub use error::CodecError;
pub use framed::{ChunkReader, ChunkWriter};
pub use http_decoder::{DecodedResponse, HttpResponseDecoder};
