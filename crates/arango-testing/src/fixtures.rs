//! Captured wire fixtures.
//!
//! The chunk header bytes below pin the legacy V1.0 layout and the V1.1
//! layout against regressions; the codec must keep matching them exactly.

/// First chunk of a two-chunk V1.1 message: 24-byte header.
/// length=30, chunkX=(2<<1)|1=5, messageId=0x2a, messageLength=12.
pub const V1_1_FIRST_CHUNK_HEADER: [u8; 24] = [
    0x1e, 0x00, 0x00, 0x00, // length
    0x05, 0x00, 0x00, 0x00, // chunkX
    0x2a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // messageId
    0x0c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // messageLength
];

/// Follow-up chunk of the same message: 16-byte header.
/// length=22, chunkX=1<<1=2, messageId=0x2a.
pub const V1_1_FOLLOW_CHUNK_HEADER: [u8; 16] = [
    0x16, 0x00, 0x00, 0x00, // length
    0x02, 0x00, 0x00, 0x00, // chunkX
    0x2a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // messageId
];

/// Single-chunk V1.0 message: the legacy layout has no message-length
/// field here. length=20, chunkX=(1<<1)|1=3, messageId=7.
pub const V1_0_SINGLE_CHUNK_HEADER: [u8; 16] = [
    0x14, 0x00, 0x00, 0x00, // length
    0x03, 0x00, 0x00, 0x00, // chunkX
    0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // messageId
];

/// First chunk of a multi-chunk V1.0 message: the message-length field is
/// present. length=28, chunkX=(2<<1)|1=5, messageId=7, messageLength=40.
pub const V1_0_MULTI_FIRST_CHUNK_HEADER: [u8; 24] = [
    0x1c, 0x00, 0x00, 0x00, // length
    0x05, 0x00, 0x00, 0x00, // chunkX
    0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // messageId
    0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // messageLength
];

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use arango_protocol::vst::{ChunkHeader, VstVersion};
    use bytes::BytesMut;

    #[test]
    fn test_v1_1_first_chunk_matches_fixture() {
        let header = ChunkHeader {
            length: 30,
            chunk_x: ChunkHeader::first_chunk_x(2),
            message_id: 0x2a,
            message_length: 12,
        };
        let mut buf = BytesMut::new();
        header.encode(VstVersion::V1_1, &mut buf);
        assert_eq!(&buf[..], &V1_1_FIRST_CHUNK_HEADER);
    }

    #[test]
    fn test_v1_1_follow_chunk_matches_fixture() {
        let header = ChunkHeader {
            length: 22,
            chunk_x: ChunkHeader::follow_chunk_x(1),
            message_id: 0x2a,
            message_length: 12,
        };
        let mut buf = BytesMut::new();
        header.encode(VstVersion::V1_1, &mut buf);
        assert_eq!(&buf[..], &V1_1_FOLLOW_CHUNK_HEADER);
    }

    #[test]
    fn test_v1_0_single_chunk_matches_fixture() {
        let header = ChunkHeader {
            length: 20,
            chunk_x: ChunkHeader::first_chunk_x(1),
            message_id: 7,
            message_length: 4,
        };
        let mut buf = BytesMut::new();
        header.encode(VstVersion::V1_0, &mut buf);
        assert_eq!(&buf[..], &V1_0_SINGLE_CHUNK_HEADER);
    }

    #[test]
    fn test_v1_0_multi_chunk_first_matches_fixture() {
        let header = ChunkHeader {
            length: 28,
            chunk_x: ChunkHeader::first_chunk_x(2),
            message_id: 7,
            message_length: 40,
        };
        let mut buf = BytesMut::new();
        header.encode(VstVersion::V1_0, &mut buf);
        assert_eq!(&buf[..], &V1_0_MULTI_FIRST_CHUNK_HEADER);
    }

    #[test]
    fn test_fixture_decodes() {
        let mut cursor = &V1_0_MULTI_FIRST_CHUNK_HEADER[..];
        let decoded = ChunkHeader::decode(VstVersion::V1_0, &mut cursor).unwrap();
        assert_eq!(decoded.message_id, 7);
        assert_eq!(decoded.message_length, 40);
        assert_eq!(decoded.number_of_chunks(), 2);
    }
}
