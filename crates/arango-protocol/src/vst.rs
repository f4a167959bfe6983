//! VelocyStream chunk framing and message headers.
//!
//! A VelocyStream message is a VelocyPack header array followed by an opaque
//! payload, split into one or more chunks. Every chunk starts with a binary
//! chunk header carrying the total chunk length, a `chunkX` field (the
//! is-first bit plus either the chunk count or the chunk index), the message
//! id and — on first chunks — the total message length.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

use crate::error::ProtocolError;
use crate::types::{RestVerb, StatusCode};
use crate::vpack::{Builder, Slice};

/// Protocol version negotiated by the connection preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VstVersion {
    /// VST 1.0 (legacy).
    V1_0,
    /// VST 1.1.
    #[default]
    V1_1,
}

impl VstVersion {
    /// The preamble written to the socket directly after connecting.
    #[must_use]
    pub const fn preamble(self) -> &'static [u8] {
        match self {
            Self::V1_0 => b"VST/1.0\r\n\r\n",
            Self::V1_1 => b"VST/1.1\r\n\r\n",
        }
    }
}

/// VelocyStream message types as encoded in the message header array.
pub mod message_type {
    /// A request.
    pub const REQUEST: u64 = 1;
    /// A response.
    pub const RESPONSE: u64 = 2;
    /// An authentication message.
    pub const AUTHENTICATION: u64 = 1000;
}

/// Default maximum chunk size in bytes (header included).
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 30_000;

/// Size of a chunk header that carries the total message length.
pub const CHUNK_HEADER_SIZE_FIRST: usize = 24;

/// Size of a chunk header without the total message length.
pub const CHUNK_HEADER_SIZE_FOLLOW: usize = 16;

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Total chunk length in bytes, header included.
    pub length: u32,
    /// Is-first bit plus chunk count (first) or chunk index (follow-up).
    pub chunk_x: u32,
    /// Message id this chunk belongs to.
    pub message_id: u64,
    /// Total message length; zero when the field is absent on the wire.
    pub message_length: u64,
}

impl ChunkHeader {
    /// `chunkX` for the first chunk of a message of `number_of_chunks`.
    #[must_use]
    pub const fn first_chunk_x(number_of_chunks: u32) -> u32 {
        (number_of_chunks << 1) | 1
    }

    /// `chunkX` for the follow-up chunk with the given index.
    #[must_use]
    pub const fn follow_chunk_x(index: u32) -> u32 {
        index << 1
    }

    /// Whether this is the first chunk of its message.
    #[must_use]
    pub const fn is_first(&self) -> bool {
        self.chunk_x & 1 == 1
    }

    /// Number of chunks of the message; only meaningful on first chunks.
    #[must_use]
    pub const fn number_of_chunks(&self) -> u32 {
        self.chunk_x >> 1
    }

    /// Index of a follow-up chunk; zero on first chunks.
    #[must_use]
    pub const fn index(&self) -> u32 {
        if self.is_first() { 0 } else { self.chunk_x >> 1 }
    }

    /// Whether the total-message-length field is present on the wire for
    /// this chunk under `version`.
    ///
    /// VST 1.1 sends it on every first chunk; the legacy 1.0 layout only on
    /// first chunks of multi-chunk messages.
    #[must_use]
    pub const fn carries_message_length(version: VstVersion, chunk_x: u32) -> bool {
        let is_first = chunk_x & 1 == 1;
        match version {
            VstVersion::V1_1 => is_first,
            VstVersion::V1_0 => is_first && (chunk_x >> 1) > 1,
        }
    }

    /// On-wire size of this header under `version`.
    #[must_use]
    pub const fn header_size(version: VstVersion, chunk_x: u32) -> usize {
        if Self::carries_message_length(version, chunk_x) {
            CHUNK_HEADER_SIZE_FIRST
        } else {
            CHUNK_HEADER_SIZE_FOLLOW
        }
    }

    /// Encode the header into `dst` using the layout of `version`.
    pub fn encode(&self, version: VstVersion, dst: &mut impl BufMut) {
        dst.put_u32_le(self.length);
        dst.put_u32_le(self.chunk_x);
        dst.put_u64_le(self.message_id);
        if Self::carries_message_length(version, self.chunk_x) {
            dst.put_u64_le(self.message_length);
        }
    }

    /// Decode a header from `src`, which must hold at least
    /// [`Self::header_size`] bytes for the encoded `chunkX` (callers peek
    /// the first eight bytes to find out).
    pub fn decode(version: VstVersion, src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < CHUNK_HEADER_SIZE_FOLLOW {
            return Err(ProtocolError::Incomplete {
                expected: CHUNK_HEADER_SIZE_FOLLOW,
                actual: src.remaining(),
            });
        }
        let length = src.get_u32_le();
        let chunk_x = src.get_u32_le();
        let message_id = src.get_u64_le();
        let message_length = if Self::carries_message_length(version, chunk_x) {
            if src.remaining() < 8 {
                return Err(ProtocolError::Incomplete {
                    expected: 8,
                    actual: src.remaining(),
                });
            }
            src.get_u64_le()
        } else {
            0
        };
        let header = Self {
            length,
            chunk_x,
            message_id,
            message_length,
        };
        if (header.length as usize) < Self::header_size(version, chunk_x) {
            return Err(ProtocolError::InvalidChunk("length smaller than header"));
        }
        Ok(header)
    }
}

/// Split a message (VelocyPack header plus payload buffers) into fully
/// framed chunk buffers ready for transmission.
///
/// `max_chunk_size` bounds each chunk including its header.
pub fn split_message(
    version: VstVersion,
    message_id: u64,
    header: &[u8],
    payload: &[Bytes],
    max_chunk_size: usize,
) -> Result<SmallVec<[Bytes; 4]>, ProtocolError> {
    if max_chunk_size <= CHUNK_HEADER_SIZE_FIRST {
        return Err(ProtocolError::ChunkTooLarge {
            size: CHUNK_HEADER_SIZE_FIRST + 1,
            max: max_chunk_size,
        });
    }

    // Flatten once; chunk bodies are zero-copy slices of this buffer.
    let total = header.len() + payload.iter().map(Bytes::len).sum::<usize>();
    let mut message = BytesMut::with_capacity(total);
    message.put_slice(header);
    for buffer in payload {
        message.put_slice(buffer);
    }
    let message = message.freeze();

    let body_per_chunk = max_chunk_size - CHUNK_HEADER_SIZE_FIRST;
    let number_of_chunks = total.div_ceil(body_per_chunk).max(1) as u32;

    let mut chunks = SmallVec::new();
    for index in 0..number_of_chunks {
        let begin = index as usize * body_per_chunk;
        let end = (begin + body_per_chunk).min(total);
        let body = message.slice(begin..end);

        let chunk_x = if index == 0 {
            ChunkHeader::first_chunk_x(number_of_chunks)
        } else {
            ChunkHeader::follow_chunk_x(index)
        };
        let header_size = ChunkHeader::header_size(version, chunk_x);
        let chunk_header = ChunkHeader {
            length: (header_size + body.len()) as u32,
            chunk_x,
            message_id,
            message_length: total as u64,
        };

        let mut framed = BytesMut::with_capacity(header_size + body.len());
        chunk_header.encode(version, &mut framed);
        framed.put_slice(&body);
        chunks.push(framed.freeze());
    }
    Ok(chunks)
}

/// Build the VelocyPack request header array
/// `[version, type, database, requestType, request, parameters, meta]`.
pub fn request_header(
    database: &str,
    verb: RestVerb,
    path: &str,
    parameters: &[(String, String)],
    meta: &HashMap<String, String>,
) -> Result<Bytes, ProtocolError> {
    if !path.starts_with('/') {
        return Err(ProtocolError::InvalidPath(path.to_string()));
    }
    let mut builder = Builder::new();
    builder.open_array()?;
    builder.add_uint(1)?;
    builder.add_uint(message_type::REQUEST)?;
    builder.add_string(database)?;
    builder.add_uint(verb.vst_value())?;
    builder.add_string(path)?;
    builder.open_object()?;
    for (key, value) in parameters {
        builder.add_key(key)?;
        builder.add_string(value)?;
    }
    builder.close()?;
    builder.open_object()?;
    for (name, value) in meta {
        builder.add_key(name)?;
        builder.add_string(value)?;
    }
    builder.close()?;
    builder.close()?;
    builder.into_bytes()
}

/// Build the VelocyPack authentication header
/// `[version, 1000, "plain", user, password]`.
pub fn auth_header_plain(user: &str, password: &str) -> Result<Bytes, ProtocolError> {
    let mut builder = Builder::new();
    builder.open_array()?;
    builder.add_uint(1)?;
    builder.add_uint(message_type::AUTHENTICATION)?;
    builder.add_string("plain")?;
    builder.add_string(user)?;
    builder.add_string(password)?;
    builder.close()?;
    builder.into_bytes()
}

/// Build the VelocyPack authentication header `[version, 1000, "jwt", token]`.
pub fn auth_header_jwt(token: &str) -> Result<Bytes, ProtocolError> {
    let mut builder = Builder::new();
    builder.open_array()?;
    builder.add_uint(1)?;
    builder.add_uint(message_type::AUTHENTICATION)?;
    builder.add_string("jwt")?;
    builder.add_string(token)?;
    builder.close()?;
    builder.into_bytes()
}

/// Decoded VelocyStream response message header.
#[derive(Debug, Clone)]
pub struct VstResponseHeader {
    /// Response status code.
    pub status_code: StatusCode,
    /// Meta entries of the header, if present.
    pub meta: HashMap<String, String>,
    /// Encoded size of the header; the payload starts at this offset.
    pub header_size: usize,
}

/// Parse the VelocyPack response header `[version, 2, responseCode, meta?]`
/// at the start of a reassembled message body.
pub fn parse_response_header(data: &[u8]) -> Result<VstResponseHeader, ProtocolError> {
    let slice = Slice::new(data)?;
    if !slice.is_array() {
        return Err(ProtocolError::MalformedHeader("header is not an array"));
    }
    if slice.len()? < 3 {
        return Err(ProtocolError::MalformedHeader("header array too short"));
    }
    let message_type = slice
        .at(1)?
        .as_u64()
        .map_err(|_| ProtocolError::MalformedHeader("message type is not an integer"))?;
    if message_type != message_type::RESPONSE {
        return Err(ProtocolError::MalformedHeader("not a response message"));
    }
    let status = slice
        .at(2)?
        .as_u64()
        .map_err(|_| ProtocolError::MalformedHeader("status code is not an integer"))?;
    if !(100..=599).contains(&status) {
        return Err(ProtocolError::MalformedHeader("status code out of range"));
    }

    let mut meta = HashMap::new();
    if slice.len()? >= 4 {
        let meta_slice = slice.at(3)?;
        if meta_slice.is_object() {
            for index in 0..meta_slice.len()? {
                let (key, value) = meta_slice.entry(index)?;
                meta.insert(key.as_str()?.to_string(), value.as_str()?.to_string());
            }
        }
    }

    Ok(VstResponseHeader {
        status_code: status as StatusCode,
        meta,
        header_size: slice.byte_size()?,
    })
}

/// Build the VelocyPack response header array (used by test servers).
pub fn response_header(
    status_code: StatusCode,
    meta: &HashMap<String, String>,
) -> Result<Bytes, ProtocolError> {
    let mut builder = Builder::new();
    builder.open_array()?;
    builder.add_uint(1)?;
    builder.add_uint(message_type::RESPONSE)?;
    builder.add_uint(status_code as u64)?;
    builder.open_object()?;
    for (name, value) in meta {
        builder.add_key(name)?;
        builder.add_string(value)?;
    }
    builder.close()?;
    builder.close()?;
    builder.into_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_x_packing() {
        let first = ChunkHeader::first_chunk_x(3);
        assert_eq!(first, 0b111);
        let header = ChunkHeader {
            length: 24,
            chunk_x: first,
            message_id: 1,
            message_length: 0,
        };
        assert!(header.is_first());
        assert_eq!(header.number_of_chunks(), 3);

        let follow = ChunkHeader::follow_chunk_x(2);
        let header = ChunkHeader {
            length: 16,
            chunk_x: follow,
            message_id: 1,
            message_length: 0,
        };
        assert!(!header.is_first());
        assert_eq!(header.index(), 2);
    }

    #[test]
    fn test_header_layout_v1_1() {
        // First chunk: 24-byte header with total message length
        let header = ChunkHeader {
            length: 30,
            chunk_x: ChunkHeader::first_chunk_x(1),
            message_id: 0x0102_0304_0506_0708,
            message_length: 6,
        };
        let mut buf = BytesMut::new();
        header.encode(VstVersion::V1_1, &mut buf);
        assert_eq!(buf.len(), CHUNK_HEADER_SIZE_FIRST);
        assert_eq!(&buf[0..4], &30u32.to_le_bytes());
        assert_eq!(&buf[4..8], &3u32.to_le_bytes());
        assert_eq!(&buf[8..16], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&buf[16..24], &6u64.to_le_bytes());

        // Follow-up chunk: 16 bytes, no message length
        let follow = ChunkHeader {
            length: 20,
            chunk_x: ChunkHeader::follow_chunk_x(1),
            message_id: 9,
            message_length: 6,
        };
        let mut buf = BytesMut::new();
        follow.encode(VstVersion::V1_1, &mut buf);
        assert_eq!(buf.len(), CHUNK_HEADER_SIZE_FOLLOW);
    }

    #[test]
    fn test_header_layout_v1_0_single_chunk() {
        // Legacy layout: a single-chunk message has no message-length field
        let header = ChunkHeader {
            length: 22,
            chunk_x: ChunkHeader::first_chunk_x(1),
            message_id: 7,
            message_length: 6,
        };
        let mut buf = BytesMut::new();
        header.encode(VstVersion::V1_0, &mut buf);
        assert_eq!(buf.len(), CHUNK_HEADER_SIZE_FOLLOW);

        let mut cursor = &buf[..];
        let decoded = ChunkHeader::decode(VstVersion::V1_0, &mut cursor).unwrap();
        assert_eq!(decoded.message_length, 0);
        assert_eq!(decoded.message_id, 7);
    }

    #[test]
    fn test_header_round_trip() {
        for version in [VstVersion::V1_0, VstVersion::V1_1] {
            let header = ChunkHeader {
                length: 100,
                chunk_x: ChunkHeader::first_chunk_x(4),
                message_id: 42,
                message_length: 320,
            };
            let mut buf = BytesMut::new();
            header.encode(version, &mut buf);
            let mut cursor = &buf[..];
            let decoded = ChunkHeader::decode(version, &mut cursor).unwrap();
            assert_eq!(decoded, header);
        }
    }

    #[test]
    fn test_split_message_counts() {
        let header = [0u8; 10];
        let payload = [Bytes::from(vec![1u8; 100])];

        // Everything fits into one chunk
        let chunks =
            split_message(VstVersion::V1_1, 5, &header, &payload, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), CHUNK_HEADER_SIZE_FIRST + 110);

        // Force two chunks: 24-byte headers, 60-byte bodies
        let chunks = split_message(VstVersion::V1_1, 5, &header, &payload, 84).unwrap();
        assert_eq!(chunks.len(), 2);
        let mut cursor = &chunks[0][..];
        let first = ChunkHeader::decode(VstVersion::V1_1, &mut cursor).unwrap();
        assert!(first.is_first());
        assert_eq!(first.number_of_chunks(), 2);
        assert_eq!(first.message_length, 110);
    }

    #[test]
    fn test_request_header_round_trippable() {
        let meta = HashMap::from([("x-custom".to_string(), "yes".to_string())]);
        let header = request_header(
            "_system",
            RestVerb::Post,
            "/_api/document",
            &[("waitForSync".to_string(), "true".to_string())],
            &meta,
        )
        .unwrap();
        let slice = Slice::new(&header).unwrap();
        assert_eq!(slice.len().unwrap(), 7);
        assert_eq!(slice.at(1).unwrap().as_u64().unwrap(), message_type::REQUEST);
        assert_eq!(slice.at(2).unwrap().as_str().unwrap(), "_system");
        assert_eq!(
            slice.at(3).unwrap().as_u64().unwrap(),
            RestVerb::Post.vst_value()
        );
        assert_eq!(slice.at(4).unwrap().as_str().unwrap(), "/_api/document");
        let params = slice.at(5).unwrap();
        assert_eq!(
            params
                .get("waitForSync")
                .unwrap()
                .unwrap()
                .as_str()
                .unwrap(),
            "true"
        );
    }

    #[test]
    fn test_request_header_rejects_relative_path() {
        let result = request_header("_system", RestVerb::Get, "no-slash", &[], &HashMap::new());
        assert!(matches!(result, Err(ProtocolError::InvalidPath(_))));
    }

    #[test]
    fn test_response_header_round_trip() {
        let meta = HashMap::from([("content-type".to_string(), "application/json".to_string())]);
        let encoded = response_header(200, &meta).unwrap();

        let mut with_payload = encoded.to_vec();
        with_payload.extend_from_slice(b"{\"ok\":true}");

        let parsed = parse_response_header(&with_payload).unwrap();
        assert_eq!(parsed.status_code, 200);
        assert_eq!(parsed.header_size, encoded.len());
        assert_eq!(
            parsed.meta.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(&with_payload[parsed.header_size..], b"{\"ok\":true}");
    }

    #[test]
    fn test_parse_rejects_request_type() {
        let header = request_header("_system", RestVerb::Get, "/x", &[], &HashMap::new()).unwrap();
        assert!(matches!(
            parse_response_header(&header),
            Err(ProtocolError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_preambles() {
        assert_eq!(VstVersion::V1_1.preamble(), b"VST/1.1\r\n\r\n");
        assert_eq!(VstVersion::V1_0.preamble(), b"VST/1.0\r\n\r\n");
    }
}
