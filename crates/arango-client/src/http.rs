//! HTTP/1.1 driver: half-duplex, one request on the wire at a time.
//!
//! The serve task alternates between a write step (pop one item, move it
//! into the store, send head plus payload) and a read step (stream the
//! response through the decoder until message complete). The combined
//! write/read loop is toggled through the loop-state flags: submitters
//! start it when both flags are clear and work is queued, the serve task
//! clears both flags once the queue drains.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use arango_codec::HttpResponseDecoder;
use arango_protocol::{ErrorCondition, Response, RestVerb};
use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};

use crate::connection::{
    ConnectionInner, READ_BLOCK_SIZE, ServeEnd, Transport, drain_queue, establish, finish,
    make_tls, park_until_work,
};
use crate::loop_state::LOOP_FLAGS;
use crate::store::{MessageStore, WireForm};

/// Serve task entry point for an HTTP connection.
pub(crate) async fn serve(inner: Arc<ConnectionInner>) {
    let mut store = MessageStore::new();

    let tls = match make_tls(&inner) {
        Ok(tls) => tls,
        Err(message) => {
            tracing::error!(%message, "http connection cannot start");
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

        let transport = match establish(&inner, tls.as_ref()).await {
            Ok(transport) => transport,
            Err((condition, message)) => {
                tracing::warn!(%message, "http connect failed");
                inner.config.notify_failure(condition, &message);
                store.cancel_all(condition);
                drain_queue(&inner, condition);
                // Park; the next submission retries resolution
                if !park_until_work(&inner).await {
                    finish(&inner, &mut store);
                    return;
                }
                continue;
            }
        };

        inner.connected.store(true, Ordering::SeqCst);
        tracing::debug!("http connection established");

        let end = drive(&inner, &mut store, transport).await;
        inner.connected.store(false, Ordering::SeqCst);
        inner.state.clear_flags();

        match end {
            ServeEnd::Shutdown => {
                finish(&inner, &mut store);
                return;
            }
            ServeEnd::Restart(condition) => {
                tracing::warn!(?condition, "http connection failed, restarting");
                inner.config.notify_failure(condition, condition.message());
                store.cancel_all(condition);
                // Queued items survive the restart
            }
            ServeEnd::Fatal(condition) => {
                tracing::error!(?condition, "http connection shut down");
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

/// Run the half-duplex write/read loop until the session ends.
async fn drive(
    inner: &ConnectionInner,
    store: &mut MessageStore,
    transport: Transport,
) -> ServeEnd {
    let (mut read_half, mut write_half) = tokio::io::split(transport);
    let mut decoder = HttpResponseDecoder::new();
    let mut read_buf = BytesMut::with_capacity(READ_BLOCK_SIZE);

    // Connection is up: kick the loop if submissions are already queued
    inner.state.try_start_both();

    loop {
        // Idle until the combined loop is active
        loop {
            if inner.is_shutdown() {
                return ServeEnd::Shutdown;
            }
            let state = inner.state.load();
            if state & LOOP_FLAGS != 0 {
                break;
            }
            if inner.state.try_start_both() {
                break;
            }
            inner.wakeup.notified().await;
        }

        // Stop rule: clear the flags while nothing is queued
        if inner.state.try_stop_both() {
            continue;
        }

        // Write step: exactly one item goes on the wire
        inner.state.sub_queued();
        let Some(item) = inner.queue.pop() else {
            continue;
        };
        let item = *item;
        let message_id = item.message_id();
        let head_request = item.request.header.rest_verb == RestVerb::Head;
        let WireForm::Http { head } = &item.wire else {
            item.fail(ErrorCondition::ProtocolError);
            continue;
        };
        let head = head.clone();
        let payload: SmallVec<[Bytes; 2]> = item.request.payload_buffers().iter().cloned().collect();

        // Into the store before the first byte is written
        store.add(item);

        if let Err(e) = write_item(&mut write_half, &head, &payload).await {
            tracing::warn!(error = %e, message_id, "http write failed");
            if let Some(item) = store.remove_by_id(message_id) {
                item.fail(ErrorCondition::WriteError);
            }
            return ServeEnd::Restart(ErrorCondition::WriteError);
        }
        tracing::trace!(message_id, "http request written, awaiting response");

        // Read step: stream the response until message complete
        decoder.reset();
        if head_request {
            decoder.expect_head_response();
        }
        let decoded = loop {
            match decoder.decode(&mut read_buf) {
                Ok(Some(decoded)) => break decoded,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "invalid http response");
                    if let Some(item) = store.remove_by_id(message_id) {
                        item.fail(ErrorCondition::ProtocolError);
                    }
                    return ServeEnd::Fatal(ErrorCondition::ProtocolError);
                }
            }

            read_buf.reserve(READ_BLOCK_SIZE);
            tokio::select! {
                result = read_half.read_buf(&mut read_buf) => match result {
                    Ok(0) => return ServeEnd::Restart(ErrorCondition::ConnectionError),
                    Ok(n) => tracing::trace!(bytes = n, "http read"),
                    Err(e) => {
                        tracing::warn!(error = %e, "http read failed");
                        return ServeEnd::Restart(ErrorCondition::ReadError);
                    }
                },
                _ = inner.wakeup.notified() => {
                    if inner.is_shutdown() {
                        return ServeEnd::Shutdown;
                    }
                    // New submissions wait until this exchange completes
                }
            }
        };

        if !read_buf.is_empty() {
            // Bytes beyond the response end: the server pipelined, which
            // this half-duplex driver never requested
            tracing::error!("unexpected bytes after http response");
            if let Some(item) = store.remove_by_id(message_id) {
                item.fail(ErrorCondition::ProtocolError);
            }
            return ServeEnd::Fatal(ErrorCondition::ProtocolError);
        }

        if let Some(item) = store.remove_by_id(message_id) {
            let mut response = Response::new(message_id);
            response.header.status_code = decoded.status;
            response.header.meta = decoded.meta;
            response.header.content_type = decoded.content_type;
            response.payload = decoded.body;
            item.complete(response);
        }
        tracing::trace!(message_id, "http response delivered");
    }
}

/// Gathered write of the serialized head followed by the payload buffers.
async fn write_item(
    write_half: &mut WriteHalf<Transport>,
    head: &Bytes,
    payload: &[Bytes],
) -> std::io::Result<()> {
    write_half.write_all(head).await?;
    for buffer in payload {
        write_half.write_all(buffer).await?;
    }
    write_half.flush().await
}
