//! Mock ArangoDB HTTP server for unit testing.
//!
//! Serves canned responses per `(method, path)` route over keep-alive
//! HTTP/1.1 connections, without requiring a real database instance.
//! A `/_api/version` route answering like an ArangoDB 3.x server is
//! installed by default.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::MockServerError;

/// A canned HTTP response.
#[derive(Debug, Clone)]
pub struct MockHttpResponse {
    /// Status code and reason phrase.
    pub status: u16,
    /// Content type emitted on the wire.
    pub content_type: String,
    /// Response body.
    pub body: Bytes,
    /// Send the body with chunked transfer coding split into this many
    /// chunks instead of `Content-Length`.
    pub chunked: Option<usize>,
    /// Extra headers, emitted verbatim.
    pub extra_headers: Vec<(String, String)>,
}

impl MockHttpResponse {
    /// A JSON response with the given status and body.
    #[must_use]
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: body.into(),
            chunked: None,
            extra_headers: Vec::new(),
        }
    }

    /// The stock `/_api/version` body of an ArangoDB 3.x server.
    #[must_use]
    pub fn version() -> Self {
        Self::json(
            200,
            &br#"{"server":"arango","license":"community","version":"3.12.4"}"#[..],
        )
    }

    /// Switch the response to chunked transfer coding.
    #[must_use]
    pub fn with_chunked(mut self, chunks: usize) -> Self {
        self.chunked = Some(chunks.max(1));
        self
    }

    /// Add an extra response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

/// One request the server received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: String,
    /// Request target (path plus query).
    pub target: String,
    /// Request headers as received.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

/// Builder for [`MockHttpServer`].
#[derive(Debug, Default)]
pub struct MockHttpServerBuilder {
    routes: HashMap<(String, String), MockHttpResponse>,
    silent: bool,
    response_delay: Option<Duration>,
}

impl MockHttpServerBuilder {
    /// Register a response for `method path`.
    #[must_use]
    pub fn with_route(
        mut self,
        method: &str,
        path: &str,
        response: MockHttpResponse,
    ) -> Self {
        self.routes
            .insert((method.to_uppercase(), path.to_string()), response);
        self
    }

    /// Accept connections and read requests but never answer them.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Delay every response.
    #[must_use]
    pub fn response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    /// Bind to an ephemeral localhost port and start serving.
    pub async fn build(mut self) -> Result<MockHttpServer, MockServerError> {
        self.routes
            .entry(("GET".to_string(), "/_api/version".to_string()))
            .or_insert_with(MockHttpResponse::version);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let state = Arc::new(ServerState {
            routes: self.routes,
            silent: self.silent,
            response_delay: self.response_delay,
            requests: Arc::clone(&requests),
        });

        let mut accept_shutdown = shutdown_tx.subscribe();
        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "mock http connection accepted");
                            let state = Arc::clone(&accept_state);
                            tokio::spawn(handle_connection(stream, state));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "mock http accept failed");
                            break;
                        }
                    },
                    _ = accept_shutdown.recv() => break,
                }
            }
        });

        Ok(MockHttpServer {
            addr,
            shutdown: shutdown_tx,
            requests,
        })
    }
}

struct ServerState {
    routes: HashMap<(String, String), MockHttpResponse>,
    silent: bool,
    response_delay: Option<Duration>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Mock ArangoDB HTTP server bound to an ephemeral localhost port.
pub struct MockHttpServer {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpServer {
    /// Builder for a mock server.
    #[must_use]
    pub fn builder() -> MockHttpServerBuilder {
        MockHttpServerBuilder::default()
    }

    /// The bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>` for the connection builder.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        let request = match read_request(&mut stream, &mut buf).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "mock http connection ended");
                return;
            }
        };

        tracing::debug!(
            method = %request.method,
            target = %request.target,
            "mock http request"
        );
        state.requests.lock().push(request.clone());

        if state.silent {
            // Hold the connection open without answering
            let mut hold = [0u8; 1];
            let _ = stream.read(&mut hold).await;
            return;
        }

        if let Some(delay) = state.response_delay {
            tokio::time::sleep(delay).await;
        }

        let path = request
            .target
            .split('?')
            .next()
            .unwrap_or(&request.target)
            .to_string();
        let response = state
            .routes
            .get(&(request.method.clone(), path))
            .cloned()
            .unwrap_or_else(|| {
                MockHttpResponse::json(404, &br#"{"error":true,"code":404}"#[..])
            });

        if write_response(&mut stream, &request.method, &response)
            .await
            .is_err()
        {
            return;
        }
    }
}

/// Read one request (head plus `Content-Length` body) from the stream.
async fn read_request(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<Option<RecordedRequest>, MockServerError> {
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut headers);
        match parsed.parse(&buf[..]) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = parsed.method.unwrap_or("").to_string();
                let target = parsed.path.unwrap_or("").to_string();
                let mut header_list = Vec::new();
                let mut content_length = 0usize;
                for header in parsed.headers.iter() {
                    let value = String::from_utf8_lossy(header.value).to_string();
                    if header.name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                    header_list.push((header.name.to_string(), value));
                }

                let _ = buf.split_to(head_len);
                while buf.len() < content_length {
                    if stream.read_buf(buf).await? == 0 {
                        return Err(MockServerError::Protocol(
                            "connection closed mid-body".to_string(),
                        ));
                    }
                }
                let body = buf.split_to(content_length).freeze();
                return Ok(Some(RecordedRequest {
                    method,
                    target,
                    headers: header_list,
                    body,
                }));
            }
            Ok(httparse::Status::Partial) => {}
            Err(e) => return Err(MockServerError::Protocol(format!("bad request: {e}"))),
        }

        if stream.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(MockServerError::Protocol(
                    "connection closed mid-head".to_string(),
                ))
            };
        }
    }
}

async fn write_response(
    stream: &mut TcpStream,
    request_method: &str,
    response: &MockHttpResponse,
) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nServer: Mock-ArangoDB\r\nConnection: Keep-Alive\r\nContent-Type: {}\r\n",
        response.status,
        reason_phrase(response.status),
        response.content_type,
    );
    for (name, value) in &response.extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }

    let head_request = request_method.eq_ignore_ascii_case("HEAD");
    let body = if head_request {
        Bytes::new()
    } else {
        response.body.clone()
    };

    // A HEAD response never carries body framing beyond its headers
    match response.chunked.filter(|_| !head_request) {
        None => {
            head.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&body).await?;
        }
        Some(chunks) => {
            head.push_str("Transfer-Encoding: chunked\r\n\r\n");
            stream.write_all(head.as_bytes()).await?;
            let piece = body.len().div_ceil(chunks).max(1);
            for part in body.chunks(piece) {
                stream
                    .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                    .await?;
                stream.write_all(part).await?;
                stream.write_all(b"\r\n").await?;
            }
            stream.write_all(b"0\r\n\r\n").await?;
        }
    }
    stream.flush().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Mock",
    }
}
