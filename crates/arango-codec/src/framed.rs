//! Framed chunk streams for async I/O.
//!
//! Split stream types over a transport:
//! - `ChunkReader<T>` - read side, yields decoded chunks
//! - `ChunkWriter<T>` - write side, frames outgoing chunks
//!
//! The full-duplex driver reads through `ChunkReader` while writing
//! pre-framed chunk buffers on the other half of the split transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::chunk_codec::{Chunk, VstCodec};
use crate::error::CodecError;

pin_project! {
    /// A read-only stream of decoded VelocyStream chunks.
    pub struct ChunkReader<T> {
        #[pin]
        inner: FramedRead<T, VstCodec>,
    }
}

impl<T> ChunkReader<T>
where
    T: AsyncRead,
{
    /// Create a new chunk reader over the given transport.
    pub fn new(transport: T, codec: VstCodec) -> Self {
        Self {
            inner: FramedRead::new(transport, codec),
        }
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &VstCodec {
        self.inner.decoder()
    }

    /// Get a reference to the read buffer.
    pub fn read_buffer(&self) -> &BytesMut {
        self.inner.read_buffer()
    }
}

impl<T> Stream for ChunkReader<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Chunk, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for ChunkReader<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}

pin_project! {
    /// A write-only sink framing outgoing VelocyStream chunks.
    pub struct ChunkWriter<T> {
        #[pin]
        inner: FramedWrite<T, VstCodec>,
    }
}

impl<T> ChunkWriter<T>
where
    T: AsyncWrite,
{
    /// Create a new chunk writer over the given transport.
    pub fn new(transport: T, codec: VstCodec) -> Self {
        Self {
            inner: FramedWrite::new(transport, codec),
        }
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &VstCodec {
        self.inner.encoder()
    }
}

impl<T> Sink<Chunk> for ChunkWriter<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Chunk) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for ChunkWriter<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}
