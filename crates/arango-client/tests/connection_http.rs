//! HTTP driver integration tests against the mock server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use arango_client::{ConnectionBuilder, ErrorCondition, Reactor, Request, RestVerb};
use arango_testing::{MockHttpResponse, MockHttpServer};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_api_version() {
    let server = MockHttpServer::builder().build().await.unwrap();
    let reactor = Reactor::new().unwrap();
    let connection = ConnectionBuilder::new()
        .endpoint(&server.url())
        .unwrap()
        .connect(&reactor)
        .unwrap();

    let response = tokio::task::spawn_blocking(move || {
        let response = connection.send_request(Request::get("/_api/version"));
        drop(connection);
        response
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.header.status_code, 200);
    let body: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
    assert_eq!(body["server"], "arango");
    assert!(body["version"].as_str().unwrap().starts_with('3'));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_twenty_requests() {
    let server = MockHttpServer::builder().build().await.unwrap();
    let reactor = Reactor::new().unwrap();
    let connection = ConnectionBuilder::new()
        .endpoint(&server.url())
        .unwrap()
        .connect(&reactor)
        .unwrap();

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let mut submitted = Vec::new();
    for _ in 0..20 {
        let tx = result_tx.clone();
        let id = connection
            .send_request_async(Request::get("/_api/version"), move |request, result| {
                let _ = tx.send((request.message_id, result));
            })
            .unwrap();
        submitted.push(id);
    }

    let mut bodies = Vec::new();
    let mut seen = Vec::new();
    for _ in 0..20 {
        let (id, result) = timeout(WAIT, result_rx.recv()).await.unwrap().unwrap();
        let response = result.unwrap();
        assert_eq!(response.message_id, id);
        assert_eq!(response.header.status_code, 200);
        bodies.push(response.payload);
        seen.push(id);
    }

    seen.sort_unstable();
    let mut expected = submitted.clone();
    expected.sort_unstable();
    assert_eq!(seen, expected);
    assert!(bodies.iter().all(|body| body == &bodies[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_refused_fails_pending() {
    // Bind and drop to get a port that refuses connections
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let (failure_tx, mut failure_rx) = mpsc::unbounded_channel();
    let reactor = Reactor::new().unwrap();
    let connection = ConnectionBuilder::new()
        .endpoint(&format!("http://{addr}"))
        .unwrap()
        .connect_timeout(Duration::from_secs(2))
        .on_failure(move |condition, _message| {
            let _ = failure_tx.send(condition);
        })
        .connect(&reactor)
        .unwrap();

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    connection
        .send_request_async(Request::get("/_api/version"), move |_request, result| {
            let _ = result_tx.send(result);
        })
        .unwrap();

    let condition = timeout(WAIT, failure_rx.recv()).await.unwrap().unwrap();
    assert_eq!(condition, ErrorCondition::CouldNotConnect);

    let result = timeout(WAIT, result_rx.recv()).await.unwrap().unwrap();
    let error = result.unwrap_err();
    assert_eq!(error.condition(), ErrorCondition::CouldNotConnect);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mid_flight_shutdown_cancels_every_request() {
    let server = MockHttpServer::builder().silent().build().await.unwrap();
    let reactor = Reactor::new().unwrap();
    let connection = ConnectionBuilder::new()
        .endpoint(&server.url())
        .unwrap()
        .connect(&reactor)
        .unwrap();

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    for _ in 0..10 {
        let tx = result_tx.clone();
        connection
            .send_request_async(Request::get("/_api/version"), move |_request, result| {
                let _ = tx.send(result);
            })
            .unwrap();
    }
    assert_eq!(connection.requests_left(), 10);
    drop(connection);

    for _ in 0..10 {
        let result = timeout(WAIT, result_rx.recv()).await.unwrap().unwrap();
        assert!(result.is_err());
        assert_ne!(result.unwrap_err().condition(), ErrorCondition::NoError);
    }
    // Exactly ten callbacks, never more
    drop(result_tx);
    assert!(result_rx.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queue_overflow_is_synchronous_and_unregistered() {
    let server = MockHttpServer::builder().silent().build().await.unwrap();
    let reactor = Reactor::new().unwrap();
    let connection = ConnectionBuilder::new()
        .endpoint(&server.url())
        .unwrap()
        .connect(&reactor)
        .unwrap();

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let mut accepted = 0usize;
    let mut overflowed = 0usize;
    // 1024 queue slots plus at most one item the serve task has in flight
    for _ in 0..1030 {
        let tx = result_tx.clone();
        match connection
            .send_request_async(Request::get("/_api/version"), move |_request, result| {
                let _ = tx.send(result);
            }) {
            Ok(_) => accepted += 1,
            Err(e) => {
                assert_eq!(e.condition(), ErrorCondition::QueueCapacityExceeded);
                overflowed += 1;
            }
        }
    }
    assert!(overflowed > 0, "expected the bounded queue to overflow");
    assert!(accepted <= 1025);
    assert_eq!(connection.requests_left(), accepted);

    drop(connection);
    let mut callbacks = 0usize;
    drop(result_tx);
    while let Some(result) = timeout(WAIT, result_rx.recv()).await.unwrap() {
        assert!(result.is_err());
        callbacks += 1;
    }
    // Rejected submissions never registered a callback
    assert_eq!(callbacks, accepted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn half_duplex_preserves_submission_order() {
    let server = MockHttpServer::builder()
        .with_route("GET", "/a", MockHttpResponse::json(200, &b"{\"r\":\"a\"}"[..]))
        .with_route("GET", "/b", MockHttpResponse::json(200, &b"{\"r\":\"b\"}"[..]))
        .with_route("GET", "/c", MockHttpResponse::json(200, &b"{\"r\":\"c\"}"[..]))
        .build()
        .await
        .unwrap();
    let reactor = Reactor::new().unwrap();
    let connection = ConnectionBuilder::new()
        .endpoint(&server.url())
        .unwrap()
        .connect(&reactor)
        .unwrap();

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    for path in ["/a", "/b", "/c"] {
        let tx = result_tx.clone();
        connection
            .send_request_async(Request::get(path), move |request, result| {
                let _ = tx.send((request.header.path.clone(), result));
            })
            .unwrap();
    }

    let mut completion_order = Vec::new();
    for _ in 0..3 {
        let (path, result) = timeout(WAIT, result_rx.recv()).await.unwrap().unwrap();
        assert!(result.unwrap().is_success());
        completion_order.push(path);
    }
    assert_eq!(completion_order, ["/a", "/b", "/c"]);

    let observed: Vec<String> = server
        .requests()
        .iter()
        .map(|request| request.target.clone())
        .collect();
    assert_eq!(observed, ["/a", "/b", "/c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chunked_response_bodies_are_reassembled() {
    let body = Bytes::from(vec![b'x'; 10_000]);
    let server = MockHttpServer::builder()
        .with_route(
            "GET",
            "/big",
            MockHttpResponse::json(200, body.clone()).with_chunked(7),
        )
        .build()
        .await
        .unwrap();
    let reactor = Reactor::new().unwrap();
    let connection = ConnectionBuilder::new()
        .endpoint(&server.url())
        .unwrap()
        .connect(&reactor)
        .unwrap();

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    connection
        .send_request_async(Request::get("/big"), move |_request, result| {
            let _ = result_tx.send(result);
        })
        .unwrap();

    let result = timeout(WAIT, result_rx.recv()).await.unwrap().unwrap();
    let response = result.unwrap();
    assert_eq!(response.payload, body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_sends_body_and_auth_header() {
    let server = MockHttpServer::builder()
        .with_route(
            "POST",
            "/_api/document",
            MockHttpResponse::json(201, &b"{\"ok\":true}"[..]),
        )
        .build()
        .await
        .unwrap();
    let reactor = Reactor::new().unwrap();
    let connection = ConnectionBuilder::new()
        .endpoint(&server.url())
        .unwrap()
        .basic_auth("root", "secret")
        .connect(&reactor)
        .unwrap();

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let request = Request::new(RestVerb::Post, "/_api/document")
        .parameter("collection", "users")
        .payload(Bytes::from_static(b"{\"name\":\"alice\"}"));
    connection
        .send_request_async(request, move |_request, result| {
            let _ = result_tx.send(result);
        })
        .unwrap();

    let result = timeout(WAIT, result_rx.recv()).await.unwrap().unwrap();
    assert_eq!(result.unwrap().header.status_code, 201);

    let recorded = server.requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].target, "/_api/document?collection=users");
    assert_eq!(&recorded[0].body[..], b"{\"name\":\"alice\"}");
    let auth = recorded[0]
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .expect("authorization header present");
    assert!(auth.1.starts_with("Basic "));
}
