//! # arango-tls
//!
//! TLS negotiation for ArangoDB client connections.
//!
//! Wraps rustls with the driver's defaults: Mozilla roots, RFC 2818 server
//! name verification against the dialed host, and an opt-in trust-any mode
//! for test setups with self-signed certificates.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;

pub use config::TlsConfig;
pub use connector::{TlsConnector, default_tls_config};
pub use error::TlsError;

/// A TLS stream over a transport `T`.
pub type TlsStream<T> = tokio_rustls::client::TlsStream<T>;
