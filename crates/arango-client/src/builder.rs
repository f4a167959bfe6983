//! Fluent connection builder.
//!
//! Collects configuration from a connection URL and fluent setters, then
//! constructs the right driver and starts it on a reactor.

use std::sync::Arc;
use std::time::Duration;

use arango_protocol::types::{Authentication, TransportProtocol};
use arango_protocol::vst::VstVersion;
use arango_protocol::ErrorCondition;
use arango_tls::TlsConfig;
use url::Url;

use crate::config::{ConnectionConfiguration, DEFAULT_PORT};
use crate::connection::{Connection, ConnectionInner};
use crate::error::{Error, Result};
use crate::reactor::Reactor;
use crate::{http, vst};

/// Builder for [`Connection`]s.
///
/// ```rust,ignore
/// use arango_client::{ConnectionBuilder, Reactor};
///
/// let reactor = Reactor::new()?;
/// let connection = ConnectionBuilder::new()
///     .endpoint("vst://localhost:8529")?
///     .basic_auth("root", "secret")
///     .connect(&reactor)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfiguration,
}

impl ConnectionBuilder {
    /// Create a builder with default configuration
    /// (`vst://127.0.0.1:8529`, no authentication).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server endpoint from a URL of the form
    /// `(http|vst)[s]://host:port`. A missing port defaults to 8529.
    pub fn endpoint(mut self, url: &str) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|e| Error::Config(format!("invalid url `{url}`: {e}")))?;

        let (protocol, use_tls) = match parsed.scheme() {
            "http" => (TransportProtocol::Http, false),
            "https" => (TransportProtocol::Http, true),
            "vst" => (TransportProtocol::Vst, false),
            "vsts" => (TransportProtocol::Vst, true),
            other => {
                return Err(Error::Config(format!(
                    "unsupported scheme `{other}` (expected http, https, vst or vsts)"
                )));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Config(format!("url `{url}` has no host")))?
            .to_string();
        if !matches!(parsed.path(), "" | "/") {
            return Err(Error::Config(format!(
                "url `{url}` must not carry a path"
            )));
        }

        self.config.protocol = protocol;
        self.config.use_tls = use_tls;
        self.config.host = host;
        self.config.port = parsed.port().unwrap_or(DEFAULT_PORT);
        Ok(self)
    }

    /// Use HTTP Basic authentication.
    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.authentication = Authentication::Basic {
            user: user.into(),
            password: password.into(),
        };
        self
    }

    /// Use bearer-token (JWT) authentication.
    #[must_use]
    pub fn jwt_token(mut self, token: impl Into<String>) -> Self {
        self.config.authentication = Authentication::Jwt {
            token: token.into(),
        };
        self
    }

    /// Set the authentication material directly.
    #[must_use]
    pub fn authentication(mut self, authentication: Authentication) -> Self {
        self.config.authentication = authentication;
        self
    }

    /// Set the VelocyStream protocol version (VST only).
    #[must_use]
    pub fn vst_version(mut self, version: VstVersion) -> Self {
        self.config.vst_version = version;
        self
    }

    /// Set the maximum chunk size in bytes, header included (VST only).
    #[must_use]
    pub fn max_chunk_size(mut self, size: usize) -> Self {
        self.config.max_chunk_size = size;
        self
    }

    /// Set the per-attempt connect (and TLS handshake) timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the TLS options used when the scheme enables TLS.
    #[must_use]
    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    /// Install a callback for transport failures that are not specific to
    /// a single request.
    #[must_use]
    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(ErrorCondition, &str) + Send + Sync + 'static,
    {
        self.config.on_failure = Some(Arc::new(callback));
        self
    }

    /// The configuration assembled so far.
    #[must_use]
    pub fn configuration(&self) -> &ConnectionConfiguration {
        &self.config
    }

    /// Construct the driver matching the configured protocol, start it on
    /// `reactor` and return the connection handle.
    pub fn connect(self, reactor: &Reactor) -> Result<Connection> {
        if self.config.max_chunk_size <= arango_protocol::CHUNK_HEADER_SIZE_FIRST {
            return Err(Error::Config(format!(
                "max chunk size {} cannot fit a chunk header",
                self.config.max_chunk_size
            )));
        }

        let protocol = self.config.protocol;
        let inner = Arc::new(ConnectionInner::new(self.config));
        match protocol {
            TransportProtocol::Http => reactor.spawn(http::serve(Arc::clone(&inner))),
            TransportProtocol::Vst => reactor.spawn(vst::serve(Arc::clone(&inner))),
        }
        Ok(Connection::new(inner))
    }
}
