//! VelocyStream chunk codec implementation.

use arango_protocol::vst::{CHUNK_HEADER_SIZE_FOLLOW, ChunkHeader, VstVersion};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Upper bound accepted for a single incoming chunk, guarding against
/// corrupted length fields (the negotiated maximum applies to writes only).
const MAX_ACCEPTED_CHUNK: usize = 64 * 1024 * 1024;

/// A VelocyStream chunk with decoded header and body.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk header.
    pub header: ChunkHeader,
    /// Chunk body (message bytes carried by this chunk).
    pub body: BytesMut,
}

impl Chunk {
    /// Create a new chunk with the given header and body.
    #[must_use]
    pub fn new(header: ChunkHeader, body: BytesMut) -> Self {
        Self { header, body }
    }

    /// Whether this is the first chunk of its message.
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.header.is_first()
    }
}

/// VelocyStream chunk codec for tokio-util framing.
///
/// Decoding tolerates any interleaving of message ids; correlation is the
/// caller's concern. Encoding recomputes the length field from the body.
pub struct VstCodec {
    version: VstVersion,
    max_chunk_size: usize,
}

impl VstCodec {
    /// Create a codec for the given protocol version.
    #[must_use]
    pub fn new(version: VstVersion) -> Self {
        Self {
            version,
            max_chunk_size: MAX_ACCEPTED_CHUNK,
        }
    }

    /// Limit the accepted chunk size.
    #[must_use]
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size.min(MAX_ACCEPTED_CHUNK);
        self
    }

    /// The protocol version this codec speaks.
    #[must_use]
    pub fn version(&self) -> VstVersion {
        self.version
    }
}

impl Decoder for VstCodec {
    type Item = Chunk;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // length + chunkX are enough to size the rest of the header
        if src.len() < 8 {
            return Ok(None);
        }
        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        let chunk_x = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);
        let header_size = ChunkHeader::header_size(self.version, chunk_x);

        if length < header_size || length < CHUNK_HEADER_SIZE_FOLLOW {
            return Err(CodecError::Protocol(
                arango_protocol::ProtocolError::InvalidChunk("length smaller than header"),
            ));
        }
        if length > self.max_chunk_size {
            return Err(CodecError::ChunkTooLarge {
                size: length,
                max: self.max_chunk_size,
            });
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        let header = {
            let mut cursor = &frame[..];
            let header = ChunkHeader::decode(self.version, &mut cursor)?;
            frame.advance(header_size);
            header
        };

        tracing::trace!(
            message_id = header.message_id,
            length = header.length,
            is_first = header.is_first(),
            "decoded vst chunk"
        );

        Ok(Some(Chunk::new(header, frame)))
    }
}

impl Encoder<Chunk> for VstCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Chunk, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header_size = ChunkHeader::header_size(self.version, item.header.chunk_x);
        let total = header_size + item.body.len();
        if total > self.max_chunk_size {
            return Err(CodecError::ChunkTooLarge {
                size: total,
                max: self.max_chunk_size,
            });
        }

        let mut header = item.header;
        header.length = total as u32;

        dst.reserve(total);
        header.encode(self.version, dst);
        dst.put_slice(&item.body);

        tracing::trace!(
            message_id = header.message_id,
            length = total,
            is_first = header.is_first(),
            "encoded vst chunk"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use arango_protocol::vst::CHUNK_HEADER_SIZE_FIRST;

    fn first_chunk(message_id: u64, chunks: u32, body: &[u8], total: u64) -> Chunk {
        Chunk::new(
            ChunkHeader {
                length: 0,
                chunk_x: ChunkHeader::first_chunk_x(chunks),
                message_id,
                message_length: total,
            },
            BytesMut::from(body),
        )
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut codec = VstCodec::new(VstVersion::V1_1);
        let chunk = first_chunk(9, 1, b"payload", 7);

        let mut wire = BytesMut::new();
        codec.encode(chunk, &mut wire).unwrap();
        assert_eq!(wire.len(), CHUNK_HEADER_SIZE_FIRST + 7);

        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.header.message_id, 9);
        assert!(decoded.is_first());
        assert_eq!(decoded.header.message_length, 7);
        assert_eq!(&decoded.body[..], b"payload");
        assert!(wire.is_empty());
    }

    #[test]
    fn test_incomplete_chunk_returns_none() {
        let mut codec = VstCodec::new(VstVersion::V1_1);
        let chunk = first_chunk(1, 1, b"abcdef", 6);

        let mut wire = BytesMut::new();
        codec.encode(chunk, &mut wire).unwrap();

        // Feed all but the last byte
        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Fewer than 8 bytes cannot even size the header
        let mut tiny = BytesMut::from(&wire[..5]);
        assert!(codec.decode(&mut tiny).unwrap().is_none());
    }

    #[test]
    fn test_two_chunks_in_one_buffer() {
        let mut codec = VstCodec::new(VstVersion::V1_1);
        let mut wire = BytesMut::new();
        codec
            .encode(first_chunk(1, 2, b"aa", 4), &mut wire)
            .unwrap();
        let follow = Chunk::new(
            ChunkHeader {
                length: 0,
                chunk_x: ChunkHeader::follow_chunk_x(1),
                message_id: 1,
                message_length: 0,
            },
            BytesMut::from(&b"bb"[..]),
        );
        codec.encode(follow, &mut wire).unwrap();

        let first = codec.decode(&mut wire).unwrap().unwrap();
        assert!(first.is_first());
        let second = codec.decode(&mut wire).unwrap().unwrap();
        assert!(!second.is_first());
        assert_eq!(second.header.index(), 1);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let mut codec = VstCodec::new(VstVersion::V1_1).with_max_chunk_size(64);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&1_000u32.to_le_bytes());
        wire.extend_from_slice(&ChunkHeader::first_chunk_x(1).to_le_bytes());
        wire.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(CodecError::ChunkTooLarge { .. })
        ));
    }

    #[test]
    fn test_undersized_length_rejected() {
        let mut codec = VstCodec::new(VstVersion::V1_1);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&4u32.to_le_bytes());
        wire.extend_from_slice(&ChunkHeader::first_chunk_x(1).to_le_bytes());
        assert!(matches!(
            codec.decode(&mut wire),
            Err(CodecError::Protocol(_))
        ));
    }
}
