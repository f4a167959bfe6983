//! The connection engine shared by both drivers.
//!
//! Submitting threads interact with the serve task through three pieces of
//! shared state only: the loop-state atom, the bounded write queue, and a
//! wake-up [`Notify`]. The socket, the parser state, the message store and
//! the in-flight slot are owned by the serve task and never leave the
//! reactor thread; shutdown is signalled via a flag and executed there.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use arango_protocol::types::TransportProtocol;
use arango_protocol::vst::split_message;
use arango_protocol::{ErrorCondition, MessageId, Request, Response, http as http_wire, vst};
use arango_tls::{TlsConnector, TlsStream};
use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::config::ConnectionConfiguration;
use crate::error::{Error, Result};
use crate::loop_state::{LOOP_FLAGS, LoopState, WRITE_LOOP_ACTIVE, queued};
use crate::store::{RequestCallback, RequestItem, WireForm};

/// Capacity of the bounded write queue.
pub(crate) const WRITE_QUEUE_CAPACITY: usize = 1024;

/// Reservation size for socket reads.
pub(crate) const READ_BLOCK_SIZE: usize = 32 * 1024;

/// State shared between submitting threads and the serve task.
pub(crate) struct ConnectionInner {
    pub(crate) config: ConnectionConfiguration,
    pub(crate) state: LoopState,
    pub(crate) queue: ArrayQueue<Box<RequestItem>>,
    pub(crate) connected: AtomicBool,
    pub(crate) shutdown_requested: AtomicBool,
    pub(crate) permanent_failure: AtomicBool,
    pub(crate) wakeup: Notify,
    next_message_id: AtomicU64,
    pub(crate) requests_left: Arc<AtomicUsize>,
}

impl ConnectionInner {
    pub(crate) fn new(config: ConnectionConfiguration) -> Self {
        Self {
            config,
            state: LoopState::new(),
            queue: ArrayQueue::new(WRITE_QUEUE_CAPACITY),
            connected: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            permanent_failure: AtomicBool::new(false),
            wakeup: Notify::new(),
            next_message_id: AtomicU64::new(1),
            requests_left: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocate the next message id on this connection.
    pub(crate) fn next_message_id(&self) -> MessageId {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

/// How a driver session ended.
pub(crate) enum ServeEnd {
    /// The handle was dropped; cancel everything and exit.
    Shutdown,
    /// Transport failure; fail in-flight items, keep the queue, reconnect.
    Restart(ErrorCondition),
    /// Protocol violation; fail everything and park until resubmission.
    Fatal(ErrorCondition),
}

/// Fail every queued item with `condition`.
///
/// Popping may transiently outrun a producer's pending counter increment;
/// the counter self-corrects when that increment lands, and the single
/// consumer never acts on the intermediate value.
pub(crate) fn drain_queue(inner: &ConnectionInner, condition: ErrorCondition) {
    while let Some(item) = inner.queue.pop() {
        inner.state.sub_queued();
        item.fail(condition);
    }
}

/// Park until at least one write is queued. Returns `false` when shutdown
/// was requested instead.
pub(crate) async fn park_until_work(inner: &ConnectionInner) -> bool {
    loop {
        if inner.is_shutdown() {
            return false;
        }
        if queued(inner.state.load()) > 0 {
            return true;
        }
        inner.wakeup.notified().await;
    }
}

/// Terminal teardown: cancel the store and the queue with `Canceled`.
pub(crate) fn finish(inner: &ConnectionInner, store: &mut crate::store::MessageStore) {
    inner.connected.store(false, Ordering::SeqCst);
    inner.state.clear_flags();
    store.cancel_all(ErrorCondition::Canceled);
    drain_queue(inner, ErrorCondition::Canceled);
}

/// Build the TLS connector for this connection, if TLS is enabled.
///
/// A configuration that cannot produce a client config is a permanent
/// failure: no reconnection attempt can fix it.
pub(crate) fn make_tls(inner: &ConnectionInner) -> std::result::Result<Option<TlsConnector>, String> {
    if !inner.config.use_tls {
        return Ok(None);
    }
    match TlsConnector::new(inner.config.tls.clone()) {
        Ok(connector) => Ok(Some(connector)),
        Err(e) => Err(format!("invalid TLS configuration: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// An established transport, plain or TLS-wrapped.
pub(crate) enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Resolve the configured host, connect to the first reachable endpoint
/// and perform the TLS handshake when enabled. Each step runs under the
/// configured connect timeout.
pub(crate) async fn establish(
    inner: &ConnectionInner,
    tls: Option<&TlsConnector>,
) -> std::result::Result<Transport, (ErrorCondition, String)> {
    let address = inner.config.address();
    tracing::debug!(%address, "resolving host");

    let endpoints: Vec<SocketAddr> = match tokio::net::lookup_host(&address).await {
        Ok(endpoints) => endpoints.collect(),
        Err(e) => {
            return Err((
                ErrorCondition::CouldNotConnect,
                format!("resolve failed: {e}"),
            ));
        }
    };
    if endpoints.is_empty() {
        return Err((
            ErrorCondition::CouldNotConnect,
            "unable to resolve endpoints".to_string(),
        ));
    }

    let mut last_error = String::new();
    let mut connected = None;
    for endpoint in endpoints {
        tracing::debug!(%endpoint, "trying to connect");
        match timeout(inner.config.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => {
                connected = Some(stream);
                break;
            }
            Ok(Err(e)) => last_error = format!("{endpoint}: {e}"),
            Err(_) => last_error = format!("{endpoint}: connect timed out"),
        }
    }
    let Some(stream) = connected else {
        return Err((
            ErrorCondition::CouldNotConnect,
            format!("unable to connect -- {last_error}"),
        ));
    };
    let _ = stream.set_nodelay(true);
    tracing::debug!("TCP socket connected");

    match tls {
        None => Ok(Transport::Tcp(stream)),
        Some(connector) => {
            let server_name = inner.config.tls_server_name();
            match timeout(
                inner.config.connect_timeout,
                connector.connect(server_name, stream),
            )
            .await
            {
                Ok(Ok(tls_stream)) => Ok(Transport::Tls(Box::new(tls_stream))),
                Ok(Err(e)) => Err((
                    ErrorCondition::CouldNotConnect,
                    format!("unable to perform TLS handshake: {e}"),
                )),
                Err(_) => Err((
                    ErrorCondition::CouldNotConnect,
                    "TLS handshake timed out".to_string(),
                )),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// A started connection to an ArangoDB server.
///
/// Created through [`crate::ConnectionBuilder::connect`]. Dropping the
/// handle shuts the connection down; every request still in flight has its
/// callback invoked with [`ErrorCondition::Canceled`].
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    /// Submit a request and return immediately; `callback` is invoked
    /// exactly once, on the reactor thread, with either the response or
    /// the failure.
    ///
    /// Errors returned here (queue overflow, serialization failure,
    /// submission after shutdown) mean the callback was never registered.
    pub fn send_request_async<F>(&self, request: Request, callback: F) -> Result<MessageId>
    where
        F: FnOnce(Request, Result<Response>) + Send + 'static,
    {
        self.submit(request, Box::new(callback))
    }

    /// Submit a request and block until its response arrives.
    ///
    /// Must not be called from the reactor thread.
    pub fn send_request(&self, request: Request) -> Result<Response> {
        let (result_tx, result_rx) = std::sync::mpsc::sync_channel(1);
        self.submit(
            request,
            Box::new(move |_request, result| {
                let _ = result_tx.send(result);
            }),
        )?;
        match result_rx.recv() {
            Ok(result) => result,
            // The serve task vanished without invoking the callback
            Err(_) => Err(Error::Canceled),
        }
    }

    /// Number of requests that have not yet finished (queued plus in
    /// flight).
    #[must_use]
    pub fn requests_left(&self) -> usize {
        self.inner.requests_left.load(Ordering::Acquire)
    }

    /// Shut the connection down. All unfinished requests are failed with
    /// [`ErrorCondition::Canceled`] on the reactor thread.
    pub fn shutdown(&self) {
        self.inner.shutdown_requested.store(true, Ordering::SeqCst);
        self.inner.wakeup.notify_one();
    }

    fn submit(&self, mut request: Request, callback: RequestCallback) -> Result<MessageId> {
        let inner = &self.inner;
        if inner.is_shutdown() {
            return Err(Error::Canceled);
        }
        if inner.permanent_failure.load(Ordering::SeqCst) {
            return Err(Error::CouldNotConnect(
                "connection has permanently failed".to_string(),
            ));
        }

        let id = inner.next_message_id();
        request.message_id = id;

        // Serialize the wire form on the submitting thread.
        let wire = match inner.config.protocol {
            TransportProtocol::Http => {
                let head = http_wire::build_request_head(
                    &request,
                    &inner.config.host,
                    &inner.config.authentication,
                )?;
                WireForm::Http {
                    head: Bytes::from(head),
                }
            }
            TransportProtocol::Vst => {
                let database = request.header.database.as_deref().unwrap_or("_system");
                let header = vst::request_header(
                    database,
                    request.header.rest_verb,
                    &request.header.path,
                    &request.header.parameters,
                    &request.header.meta,
                )?;
                let chunks = split_message(
                    inner.config.vst_version,
                    id,
                    &header,
                    request.payload_buffers(),
                    inner.config.max_chunk_size,
                )?;
                WireForm::Vst { chunks }
            }
        };

        let item = Box::new(RequestItem::new(
            request,
            wire,
            callback,
            Arc::clone(&inner.requests_left),
        ));

        inner.requests_left.fetch_add(1, Ordering::AcqRel);
        if inner.queue.push(item).is_err() {
            inner.requests_left.fetch_sub(1, Ordering::AcqRel);
            tracing::error!("connection queue capacity exceeded");
            return Err(Error::QueueCapacityExceeded);
        }
        let state = inner.state.add_queued();

        if inner.connected.load(Ordering::Acquire) {
            let started = match inner.config.protocol {
                // Half-duplex: start both loops together when neither runs
                TransportProtocol::Http => {
                    state & LOOP_FLAGS == 0 && inner.state.try_start_both()
                }
                // Full-duplex: the write loop toggles on its own
                TransportProtocol::Vst => {
                    state & WRITE_LOOP_ACTIVE == 0 && inner.state.try_start_write()
                }
            };
            if started {
                inner.wakeup.notify_one();
            }
        } else {
            // Not connected (yet, or parked after a failure): give the
            // serve task a chance to (re)establish.
            inner.wakeup.notify_one();
        }

        if inner.is_shutdown() {
            // Shutdown raced with this submission; the serve task may have
            // already drained. Act as the drainer so the callback still
            // fires exactly once.
            drain_queue(inner, ErrorCondition::Canceled);
        }

        Ok(id)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.inner.config)
            .field("requests_left", &self.requests_left())
            .field("connected", &self.inner.connected.load(Ordering::Relaxed))
            .finish()
    }
}
