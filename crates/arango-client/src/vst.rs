//! VelocyStream driver: full-duplex, multiplexed by message id.
//!
//! After the protocol preamble (and optional authentication exchange) the
//! read loop stays active for the lifetime of the connection; the write
//! loop toggles independently whenever submissions queue up. Responses
//! complete in whatever order the server produces them; chunks are routed
//! to their in-flight item by message id and reassembled there.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use arango_codec::{Chunk, ChunkReader, CodecError, MessageAssembler, VstCodec};
use arango_protocol::types::{Authentication, ContentType};
use arango_protocol::vst::{parse_response_header, split_message};
use arango_protocol::{ErrorCondition, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use smallvec::SmallVec;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::time::timeout;

use crate::connection::{
    ConnectionInner, ServeEnd, Transport, drain_queue, establish, finish, make_tls,
    park_until_work,
};
use crate::store::{MessageStore, WireForm};

/// Serve task entry point for a VelocyStream connection.
pub(crate) async fn serve(inner: Arc<ConnectionInner>) {
    let mut store = MessageStore::new();

    let tls = match make_tls(&inner) {
        Ok(tls) => tls,
        Err(message) => {
            tracing::error!(%message, "vst connection cannot start");
            inner.permanent_failure.store(true, Ordering::SeqCst);
            inner
                .config
                .notify_failure(ErrorCondition::CouldNotConnect, &message);
            finish(&inner, &mut store);
            return;
        }
    };

    loop {
        if inner.is_shutdown() {
            finish(&inner, &mut store);
            return;
        }

        let session = match establish(&inner, tls.as_ref()).await {
            Ok(transport) => initialize(&inner, transport).await,
            Err(failure) => Err(failure),
        };
        let (reader, writer) = match session {
            Ok(halves) => halves,
            Err((condition, message)) => {
                tracing::warn!(%message, "vst connect failed");
                inner.config.notify_failure(condition, &message);
                store.cancel_all(condition);
                drain_queue(&inner, condition);
                if !park_until_work(&inner).await {
                    finish(&inner, &mut store);
                    return;
                }
                continue;
            }
        };

        inner.connected.store(true, Ordering::SeqCst);
        tracing::debug!("vst connection established");

        let end = drive(&inner, &mut store, reader, writer).await;
        inner.connected.store(false, Ordering::SeqCst);
        inner.state.clear_flags();

        match end {
            ServeEnd::Shutdown => {
                finish(&inner, &mut store);
                return;
            }
            ServeEnd::Restart(condition) => {
                tracing::warn!(?condition, "vst connection failed, restarting");
                inner.config.notify_failure(condition, condition.message());
                store.cancel_all(condition);
            }
            ServeEnd::Fatal(condition) => {
                tracing::error!(?condition, "vst connection shut down");
                inner.config.notify_failure(condition, condition.message());
                store.cancel_all(condition);
                drain_queue(&inner, condition);
                if !park_until_work(&inner).await {
                    finish(&inner, &mut store);
                    return;
                }
            }
        }
    }
}

type Halves = (ChunkReader<tokio::io::ReadHalf<Transport>>, WriteHalf<Transport>);

/// Send the protocol preamble and, when configured, run the
/// authentication exchange. Both run under the connect timeout; a
/// rejected login fails establishment.
async fn initialize(
    inner: &ConnectionInner,
    transport: Transport,
) -> Result<Halves, (ErrorCondition, String)> {
    let (read_half, write_half) = tokio::io::split(transport);
    let version = inner.config.vst_version;
    let mut reader = ChunkReader::new(read_half, VstCodec::new(version));
    let mut writer = write_half;

    let result = timeout(inner.config.connect_timeout, async {
        writer
            .write_all(version.preamble())
            .await
            .map_err(|e| format!("sending preamble failed: {e}"))?;

        let auth_header = match &inner.config.authentication {
            Authentication::None => return Ok(()),
            Authentication::Basic { user, password } => {
                arango_protocol::vst::auth_header_plain(user, password)
                    .map_err(|e| format!("building auth message failed: {e}"))?
            }
            Authentication::Jwt { token } => arango_protocol::vst::auth_header_jwt(token)
                .map_err(|e| format!("building auth message failed: {e}"))?,
        };

        let auth_id = inner.next_message_id();
        let chunks = split_message(version, auth_id, &auth_header, &[], inner.config.max_chunk_size)
            .map_err(|e| format!("framing auth message failed: {e}"))?;
        for chunk in &chunks {
            writer
                .write_all(chunk)
                .await
                .map_err(|e| format!("sending auth message failed: {e}"))?;
        }

        let mut assembler = MessageAssembler::new();
        loop {
            match reader.next().await {
                Some(Ok(chunk)) => {
                    if chunk.header.message_id != auth_id {
                        return Err("unexpected message during authentication".to_string());
                    }
                    if let Some(message) = assembler.push(chunk) {
                        let parsed = parse_response_header(&message.data)
                            .map_err(|e| format!("invalid auth response: {e}"))?;
                        if parsed.status_code >= 400 {
                            return Err(format!(
                                "authentication rejected (status {})",
                                parsed.status_code
                            ));
                        }
                        tracing::debug!(status = parsed.status_code, "vst authentication accepted");
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(format!("reading auth response failed: {e}")),
                None => return Err("connection closed during authentication".to_string()),
            }
        }
    })
    .await;

    match result {
        Ok(Ok(())) => Ok((reader, writer)),
        Ok(Err(message)) => Err((ErrorCondition::CouldNotConnect, message)),
        Err(_) => Err((
            ErrorCondition::CouldNotConnect,
            "vst initialization timed out".to_string(),
        )),
    }
}

/// Run the full-duplex loop until the session ends.
async fn drive(
    inner: &ConnectionInner,
    store: &mut MessageStore,
    mut reader: ChunkReader<tokio::io::ReadHalf<Transport>>,
    mut writer: WriteHalf<Transport>,
) -> ServeEnd {
    // The read loop stays active until teardown
    inner.state.set_read_active();

    // Submissions queued while connecting start the write loop now
    inner.state.try_start_write();
    if let Err(end) = write_queued(inner, store, &mut writer).await {
        return end;
    }

    loop {
        if inner.is_shutdown() {
            return ServeEnd::Shutdown;
        }

        tokio::select! {
            maybe_chunk = reader.next() => match maybe_chunk {
                Some(Ok(chunk)) => {
                    if let Some(end) = handle_chunk(store, chunk) {
                        return end;
                    }
                }
                Some(Err(CodecError::Io(e))) => {
                    tracing::warn!(error = %e, "vst read failed");
                    return ServeEnd::Restart(ErrorCondition::VstReadError);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "invalid vst chunk");
                    return ServeEnd::Fatal(ErrorCondition::ProtocolError);
                }
                None => return ServeEnd::Restart(ErrorCondition::ConnectionError),
            },
            _ = inner.wakeup.notified() => {
                if inner.is_shutdown() {
                    return ServeEnd::Shutdown;
                }
                // The submitter may have started the write loop, or this
                // is the first wake-up after reconnecting
                inner.state.try_start_write();
                if let Err(end) = write_queued(inner, store, &mut writer).await {
                    return end;
                }
            }
        }
    }
}

/// Drain the write queue while the write loop is active, then clear the
/// write flag per the stop rule.
async fn write_queued(
    inner: &ConnectionInner,
    store: &mut MessageStore,
    writer: &mut WriteHalf<Transport>,
) -> Result<(), ServeEnd> {
    use crate::loop_state::WRITE_LOOP_ACTIVE;
    loop {
        if inner.state.load() & WRITE_LOOP_ACTIVE == 0 {
            return Ok(());
        }
        if inner.state.try_stop_write() {
            return Ok(());
        }

        inner.state.sub_queued();
        let Some(item) = inner.queue.pop() else {
            continue;
        };
        let item = *item;
        let message_id = item.message_id();
        let WireForm::Vst { chunks } = &item.wire else {
            item.fail(ErrorCondition::ProtocolError);
            continue;
        };
        let chunks: SmallVec<[Bytes; 4]> = chunks.clone();

        // Into the store before the first byte is written
        store.add(item);

        for chunk in &chunks {
            if let Err(e) = writer.write_all(chunk).await {
                tracing::warn!(error = %e, message_id, "vst write failed");
                if let Some(item) = store.remove_by_id(message_id) {
                    item.fail(ErrorCondition::VstWriteError);
                }
                return Err(ServeEnd::Restart(ErrorCondition::VstWriteError));
            }
        }
        tracing::trace!(message_id, chunks = chunks.len(), "vst request written");
    }
}

/// Route one chunk to its in-flight item; deliver the response when the
/// message is complete.
fn handle_chunk(store: &mut MessageStore, chunk: Chunk) -> Option<ServeEnd> {
    let message_id = chunk.header.message_id;
    let Some(item) = store.get_mut(message_id) else {
        // A response for a request this connection never sent (or one that
        // was already canceled): ignore it
        tracing::warn!(message_id, "vst chunk for unknown message id");
        return None;
    };

    if chunk.is_first() {
        item.chunks_expected = chunk.header.number_of_chunks().max(1);
        if chunk.header.message_length > 0 {
            item.response_buffer
                .reserve(chunk.header.message_length as usize);
        }
    }
    item.response_buffer.extend_from_slice(&chunk.body);
    item.chunks_received += 1;

    if item.chunks_expected == 0 || item.chunks_received < item.chunks_expected {
        return None;
    }

    let mut item = store.remove_by_id(message_id)?;
    let data = std::mem::take(&mut item.response_buffer).freeze();
    match parse_response_header(&data) {
        Ok(parsed) => {
            let mut response = Response::new(message_id);
            response.header.status_code = parsed.status_code;
            response.header.content_type = parsed
                .meta
                .get("content-type")
                .map(|mime| ContentType::from_mime(mime))
                .unwrap_or(ContentType::Unset);
            response.header.meta = parsed.meta;
            response.payload = data.slice(parsed.header_size..);
            item.complete(response);
            tracing::trace!(message_id, "vst response delivered");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, message_id, "invalid vst response header");
            item.fail(ErrorCondition::ProtocolError);
            Some(ServeEnd::Fatal(ErrorCondition::ProtocolError))
        }
    }
}
