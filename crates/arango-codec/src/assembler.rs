//! VelocyStream message reassembly.
//!
//! Chunks of different messages may interleave arbitrarily on a full-duplex
//! connection. This assembler buffers chunk bodies per message id until the
//! announced chunk count has arrived.

use arango_protocol::MessageId;
use bytes::{Bytes, BytesMut};
use hashbrown::HashMap;

use crate::chunk_codec::Chunk;

/// A complete VelocyStream message reassembled from its chunks.
#[derive(Debug, Clone)]
pub struct VstMessage {
    /// Message id shared by all chunks of this message.
    pub message_id: MessageId,
    /// The message bytes: VelocyPack header followed by the payload.
    pub data: Bytes,
}

#[derive(Debug)]
struct Pending {
    buffer: BytesMut,
    received: u32,
    expected: u32,
}

/// Reassembles interleaved chunks into complete messages, keyed by id.
///
/// Bodies are concatenated in arrival order; the chunk index is not used
/// for reordering.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    pending: HashMap<MessageId, Pending>,
}

impl MessageAssembler {
    /// Create a new message assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk into the assembler.
    ///
    /// Returns `Some(VstMessage)` when this chunk completes its message,
    /// `None` while more chunks are outstanding.
    pub fn push(&mut self, chunk: Chunk) -> Option<VstMessage> {
        let message_id = chunk.header.message_id;
        let entry = self.pending.entry(message_id).or_insert_with(|| Pending {
            buffer: BytesMut::new(),
            received: 0,
            expected: 1,
        });

        if chunk.is_first() {
            entry.expected = chunk.header.number_of_chunks().max(1);
            if chunk.header.message_length > 0 {
                entry.buffer.reserve(chunk.header.message_length as usize);
            }
        }

        entry.buffer.extend_from_slice(&chunk.body);
        entry.received += 1;

        tracing::trace!(
            message_id,
            received = entry.received,
            expected = entry.expected,
            buffered = entry.buffer.len(),
            "assembling vst message"
        );

        if entry.received >= entry.expected {
            let pending = self.pending.remove(&message_id)?;
            Some(VstMessage {
                message_id,
                data: pending.buffer.freeze(),
            })
        } else {
            None
        }
    }

    /// Whether any message is partially assembled.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of messages currently being assembled.
    #[must_use]
    pub fn partial_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop all partially assembled messages.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use arango_protocol::vst::ChunkHeader;

    fn first(message_id: u64, chunks: u32, body: &[u8], total: u64) -> Chunk {
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

    fn follow(message_id: u64, index: u32, body: &[u8]) -> Chunk {
        Chunk::new(
            ChunkHeader {
                length: 0,
                chunk_x: ChunkHeader::follow_chunk_x(index),
                message_id,
                message_length: 0,
            },
            BytesMut::from(body),
        )
    }

    #[test]
    fn test_single_chunk_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler.push(first(1, 1, b"hello", 5)).unwrap();
        assert_eq!(message.message_id, 1);
        assert_eq!(&message.data[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_interleaved_messages() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(first(1, 2, b"a1", 4)).is_none());
        assert!(assembler.push(first(2, 2, b"b1", 4)).is_none());
        assert_eq!(assembler.partial_count(), 2);

        let second = assembler.push(follow(2, 1, b"b2")).unwrap();
        assert_eq!(&second.data[..], b"b1b2");

        let firstdone = assembler.push(follow(1, 1, b"a2")).unwrap();
        assert_eq!(&firstdone.data[..], b"a1a2");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_eight_chunk_message_byte_identical() {
        let mut assembler = MessageAssembler::new();
        let body: Vec<u8> = (0u8..160).collect();
        let pieces: Vec<&[u8]> = body.chunks(20).collect();
        assert_eq!(pieces.len(), 8);

        assert!(
            assembler
                .push(first(7, 8, pieces[0], body.len() as u64))
                .is_none()
        );
        for (index, piece) in pieces.iter().enumerate().skip(1) {
            let result = assembler.push(follow(7, index as u32, piece));
            if index == 7 {
                let message = result.unwrap();
                assert_eq!(&message.data[..], &body[..]);
            } else {
                assert!(result.is_none());
            }
        }
    }

    #[test]
    fn test_clear_drops_partials() {
        let mut assembler = MessageAssembler::new();
        assembler.push(first(1, 2, b"x", 2));
        assert!(assembler.has_partial());
        assembler.clear();
        assert!(!assembler.has_partial());
    }
}
