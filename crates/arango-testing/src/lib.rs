//! # arango-testing
//!
//! Test infrastructure for ArangoDB driver development: mock HTTP and
//! VelocyStream servers bound to ephemeral localhost ports, plus captured
//! wire fixtures. No real database instance is required.
//!
//! ## Example
//!
//! ```rust,ignore
//! use arango_testing::MockHttpServer;
//!
//! #[tokio::test]
//! async fn test_version() {
//!     let server = MockHttpServer::builder().build().await.unwrap();
//!     // Connect the client to server.url()...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use thiserror::Error;

pub mod fixtures;
pub mod mock_http;
pub mod mock_vst;

pub use mock_http::{MockHttpResponse, MockHttpServer, MockHttpServerBuilder, RecordedRequest};
pub use mock_vst::{MockVstServer, MockVstServerBuilder, RecordedMessage};

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}
