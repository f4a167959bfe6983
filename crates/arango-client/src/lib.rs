//! # arango-client
//!
//! Asynchronous connection engine for ArangoDB, speaking HTTP/1.1
//! (half-duplex) and VelocyStream (full-duplex, multiplexed) over TCP or
//! TLS.
//!
//! ## Architecture
//!
//! A [`Reactor`] hosts one single-threaded event loop; every connection
//! runs a serve task there which exclusively owns the socket, the parser
//! state and the message store. Application threads submit requests
//! concurrently through a lock-free path: the wire form is serialized on
//! the submitting thread, pushed onto a bounded queue, and the serve loop
//! is started — when stalled — by a compare-and-swap on a single atomic
//! word combining the loop-active flags with the queued-writes counter.
//!
//! Request callbacks fire exactly once: with the response, with the
//! transport error that ended the attempt, or with
//! [`ErrorCondition::Canceled`] when the connection shuts down. The
//! original request is handed back for resubmission. On transport
//! failures the engine tears the socket down, fails the affected
//! requests, invokes the connection failure callback, and reconnects
//! from host resolution.
//!
//! ## Example
//!
//! ```rust,ignore
//! use arango_client::{ConnectionBuilder, Reactor, Request};
//!
//! let reactor = Reactor::new()?;
//! let connection = ConnectionBuilder::new()
//!     .endpoint("http://127.0.0.1:8529")?
//!     .basic_auth("root", "")
//!     .connect(&reactor)?;
//!
//! let response = connection.send_request(Request::get("/_api/version"))?;
//! assert_eq!(response.header.status_code, 200);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod config;
pub mod connection;
pub mod error;
mod http;
mod loop_state;
pub mod reactor;
mod store;
mod vst;

pub use arango_protocol::{
    Authentication, ContentType, ErrorCondition, MessageId, Request, Response, RestVerb,
    StatusCode, TransportProtocol, VstVersion, error_to_int, int_to_error, to_rest_verb,
    to_string,
};
pub use arango_tls::TlsConfig;
pub use builder::ConnectionBuilder;
pub use config::{ConnectionConfiguration, FailureCallback};
pub use connection::Connection;
pub use error::{Error, Result};
pub use reactor::Reactor;
pub use store::RequestCallback;
