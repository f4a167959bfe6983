//! Mock ArangoDB VelocyStream server for unit testing.
//!
//! Accepts the protocol preamble, optionally enforces a "plain"
//! authentication message, reassembles chunked requests, and echoes each
//! request's payload back with a configurable chunk split. With
//! interleaving enabled the server batches responses and transmits their
//! chunks round-robin, exercising multiplexed reassembly on the client.

use std::net::SocketAddr;
use std::sync::Arc;

use arango_codec::{Chunk, ChunkReader, ChunkWriter, MessageAssembler, VstCodec, VstMessage};
use arango_protocol::vpack::Slice;
use arango_protocol::vst::{
    ChunkHeader, VstVersion, message_type, response_header,
};
use arango_protocol::MessageId;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::MockServerError;

/// One request message the server received (decoded message header).
#[derive(Debug, Clone)]
pub struct RecordedMessage {
    /// Message id from the chunk headers.
    pub message_id: MessageId,
    /// Database from the request header.
    pub database: String,
    /// Request path from the request header.
    pub path: String,
    /// The opaque payload following the message header.
    pub payload: Bytes,
}

/// Builder for [`MockVstServer`].
#[derive(Debug)]
pub struct MockVstServerBuilder {
    version: VstVersion,
    response_chunks: usize,
    interleave_batch: usize,
    require_plain_auth: Option<(String, String)>,
}

impl Default for MockVstServerBuilder {
    fn default() -> Self {
        Self {
            version: VstVersion::V1_1,
            response_chunks: 1,
            interleave_batch: 1,
            require_plain_auth: None,
        }
    }
}

impl MockVstServerBuilder {
    /// Set the VelocyStream version the server speaks.
    #[must_use]
    pub fn version(mut self, version: VstVersion) -> Self {
        self.version = version;
        self
    }

    /// Split every response into this many chunks.
    #[must_use]
    pub fn response_chunks(mut self, chunks: usize) -> Self {
        self.response_chunks = chunks.max(1);
        self
    }

    /// Hold responses until this many are pending, then send their chunks
    /// round-robin so responses interleave on the wire.
    #[must_use]
    pub fn interleave_batch(mut self, batch: usize) -> Self {
        self.interleave_batch = batch.max(1);
        self
    }

    /// Require a "plain" authentication message with these credentials
    /// before serving requests.
    #[must_use]
    pub fn require_plain_auth(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.require_plain_auth = Some((user.into(), password.into()));
        self
    }

    /// Bind to an ephemeral localhost port and start serving.
    pub async fn build(self) -> Result<MockVstServer, MockServerError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let messages = Arc::new(Mutex::new(Vec::new()));

        let state = Arc::new(ServerState {
            version: self.version,
            response_chunks: self.response_chunks,
            interleave_batch: self.interleave_batch,
            require_plain_auth: self.require_plain_auth,
            messages: Arc::clone(&messages),
        });

        let mut accept_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "mock vst connection accepted");
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, state).await {
                                    tracing::debug!(error = %e, "mock vst connection ended");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "mock vst accept failed");
                            break;
                        }
                    },
                    _ = accept_shutdown.recv() => break,
                }
            }
        });

        Ok(MockVstServer {
            addr,
            shutdown: shutdown_tx,
            messages,
        })
    }
}

struct ServerState {
    version: VstVersion,
    response_chunks: usize,
    interleave_batch: usize,
    require_plain_auth: Option<(String, String)>,
    messages: Arc<Mutex<Vec<RecordedMessage>>>,
}

/// Mock ArangoDB VelocyStream server bound to an ephemeral localhost port.
pub struct MockVstServer {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    messages: Arc<Mutex<Vec<RecordedMessage>>>,
}

impl MockVstServer {
    /// Builder for a mock server.
    #[must_use]
    pub fn builder() -> MockVstServerBuilder {
        MockVstServerBuilder::default()
    }

    /// The bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `vst://127.0.0.1:<port>` for the connection builder.
    #[must_use]
    pub fn url(&self) -> String {
        format!("vst://{}", self.addr)
    }

    /// Request messages received so far.
    #[must_use]
    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.messages.lock().clone()
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

impl Drop for MockVstServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<ServerState>,
) -> Result<(), MockServerError> {
    // The client leads with "VST/1.x\r\n\r\n"
    let mut preamble = [0u8; 11];
    stream.read_exact(&mut preamble).await?;
    if !preamble.starts_with(b"VST/") {
        return Err(MockServerError::Protocol(
            "missing VST preamble".to_string(),
        ));
    }
    tracing::debug!(
        preamble = %String::from_utf8_lossy(&preamble),
        "mock vst preamble received"
    );

    let (read_half, write_half) = stream.into_split();
    let mut reader = ChunkReader::new(read_half, VstCodec::new(state.version));
    let mut writer = ChunkWriter::new(write_half, VstCodec::new(state.version));
    let mut assembler = MessageAssembler::new();
    let mut authenticated = state.require_plain_auth.is_none();
    let mut pending: Vec<(MessageId, Vec<Chunk>)> = Vec::new();

    while let Some(result) = reader.next().await {
        let chunk = result.map_err(|e| MockServerError::Protocol(e.to_string()))?;
        let Some(message) = assembler.push(chunk) else {
            continue;
        };

        let header = Slice::new(&message.data)
            .map_err(|e| MockServerError::Protocol(e.to_string()))?;
        let kind = header
            .at(1)
            .and_then(|slice| slice.as_u64())
            .map_err(|e| MockServerError::Protocol(e.to_string()))?;

        if kind == message_type::AUTHENTICATION {
            let accepted = check_auth(&state, &header)?;
            let status = if accepted { 200 } else { 401 };
            let chunks = build_response(&state, message.message_id, status, Bytes::new())?;
            for chunk in chunks {
                writer
                    .send(chunk)
                    .await
                    .map_err(|e| MockServerError::Protocol(e.to_string()))?;
            }
            if !accepted {
                return Ok(());
            }
            authenticated = true;
            continue;
        }

        if !authenticated {
            let chunks = build_response(&state, message.message_id, 401, Bytes::new())?;
            for chunk in chunks {
                writer
                    .send(chunk)
                    .await
                    .map_err(|e| MockServerError::Protocol(e.to_string()))?;
            }
            continue;
        }

        let recorded = record_request(&message, &header, &state)?;
        tracing::debug!(
            message_id = recorded.message_id,
            path = %recorded.path,
            payload = recorded.payload.len(),
            "mock vst request"
        );

        // Echo the payload back
        let chunks = build_response(&state, message.message_id, 200, recorded.payload.clone())?;
        pending.push((message.message_id, chunks));

        if pending.len() >= state.interleave_batch {
            send_round_robin(&mut writer, &mut pending).await?;
        }
    }

    // Flush anything still held back before the peer goes away
    if !pending.is_empty() {
        send_round_robin(&mut writer, &mut pending).await?;
    }
    Ok(())
}

fn check_auth(state: &ServerState, header: &Slice<'_>) -> Result<bool, MockServerError> {
    let Some((expected_user, expected_password)) = &state.require_plain_auth else {
        return Ok(true);
    };
    let encoding = header
        .at(2)
        .and_then(|slice| slice.as_str())
        .map_err(|e| MockServerError::Protocol(e.to_string()))?;
    if encoding != "plain" {
        return Ok(false);
    }
    let user = header
        .at(3)
        .and_then(|slice| slice.as_str())
        .map_err(|e| MockServerError::Protocol(e.to_string()))?;
    let password = header
        .at(4)
        .and_then(|slice| slice.as_str())
        .map_err(|e| MockServerError::Protocol(e.to_string()))?;
    Ok(user == expected_user && password == expected_password)
}

fn record_request(
    message: &VstMessage,
    header: &Slice<'_>,
    state: &ServerState,
) -> Result<RecordedMessage, MockServerError> {
    let header_size = header
        .byte_size()
        .map_err(|e| MockServerError::Protocol(e.to_string()))?;
    let database = header
        .at(2)
        .and_then(|slice| slice.as_str())
        .unwrap_or("_system")
        .to_string();
    let path = header
        .at(4)
        .and_then(|slice| slice.as_str())
        .unwrap_or("/")
        .to_string();

    let recorded = RecordedMessage {
        message_id: message.message_id,
        database,
        path,
        payload: message.data.slice(header_size..),
    };
    state.messages.lock().push(recorded.clone());
    Ok(recorded)
}

/// Frame a response message split into the configured number of chunks.
fn build_response(
    state: &ServerState,
    message_id: MessageId,
    status: u16,
    payload: Bytes,
) -> Result<Vec<Chunk>, MockServerError> {
    let header = response_header(status, &std::collections::HashMap::new())
        .map_err(|e| MockServerError::Protocol(e.to_string()))?;

    let mut message = BytesMut::with_capacity(header.len() + payload.len());
    message.extend_from_slice(&header);
    message.extend_from_slice(&payload);
    let message = message.freeze();

    let chunk_count = state.response_chunks.min(message.len().max(1));
    let piece = message.len().div_ceil(chunk_count).max(1);
    let bodies: Vec<&[u8]> = if message.is_empty() {
        vec![&[]]
    } else {
        message.chunks(piece).collect()
    };

    let total = message.len() as u64;
    let number_of_chunks = bodies.len() as u32;
    Ok(bodies
        .into_iter()
        .enumerate()
        .map(|(index, body)| {
            let chunk_x = if index == 0 {
                ChunkHeader::first_chunk_x(number_of_chunks)
            } else {
                ChunkHeader::follow_chunk_x(index as u32)
            };
            Chunk::new(
                ChunkHeader {
                    length: 0,
                    chunk_x,
                    message_id,
                    message_length: total,
                },
                BytesMut::from(body),
            )
        })
        .collect())
}

/// Send chunks of the pending responses round-robin: first chunks of all
/// responses, then second chunks, and so on.
async fn send_round_robin(
    writer: &mut ChunkWriter<tokio::net::tcp::OwnedWriteHalf>,
    pending: &mut Vec<(MessageId, Vec<Chunk>)>,
) -> Result<(), MockServerError> {
    let mut round = 0usize;
    loop {
        let mut sent_any = false;
        for (_, chunks) in pending.iter() {
            if let Some(chunk) = chunks.get(round) {
                writer
                    .send(chunk.clone())
                    .await
                    .map_err(|e| MockServerError::Protocol(e.to_string()))?;
                sent_any = true;
            }
        }
        if !sent_any {
            break;
        }
        round += 1;
    }
    pending.clear();
    Ok(())
}
