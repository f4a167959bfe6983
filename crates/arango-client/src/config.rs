//! Connection configuration.

use std::sync::Arc;
use std::time::Duration;

use arango_protocol::types::{Authentication, TransportProtocol};
use arango_protocol::vst::{DEFAULT_MAX_CHUNK_SIZE, VstVersion};
use arango_protocol::ErrorCondition;
use arango_tls::TlsConfig;

/// Default ArangoDB port.
pub const DEFAULT_PORT: u16 = 8529;

/// Callback invoked on transport-level failures that are not specific to a
/// single request (resolution, connect, TLS, socket errors).
pub type FailureCallback = Arc<dyn Fn(ErrorCondition, &str) + Send + Sync + 'static>;

/// Immutable configuration of a connection, assembled by the builder.
#[derive(Clone)]
pub struct ConnectionConfiguration {
    /// Server host name, IPv4 literal, or bracketed IPv6 literal.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Wire protocol selected by the URL scheme.
    pub protocol: TransportProtocol,
    /// Whether the transport is TLS-wrapped.
    pub use_tls: bool,
    /// Authentication material.
    pub authentication: Authentication,
    /// VelocyStream protocol version.
    pub vst_version: VstVersion,
    /// Maximum VelocyStream chunk size (header included).
    pub max_chunk_size: usize,
    /// Deadline for each endpoint connect attempt and the TLS handshake.
    pub connect_timeout: Duration,
    /// TLS options.
    pub tls: TlsConfig,
    /// Transport failure callback.
    pub on_failure: Option<FailureCallback>,
}

impl Default for ConnectionConfiguration {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            protocol: TransportProtocol::Vst,
            use_tls: false,
            authentication: Authentication::None,
            vst_version: VstVersion::V1_1,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(15),
            tls: TlsConfig::default(),
            on_failure: None,
        }
    }
}

impl ConnectionConfiguration {
    /// `host:port` as resolved and dialed.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The host name used for TLS peer verification (IPv6 brackets
    /// stripped).
    #[must_use]
    pub fn tls_server_name(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    /// Invoke the transport failure callback, if configured.
    pub(crate) fn notify_failure(&self, condition: ErrorCondition, message: &str) {
        if let Some(on_failure) = &self.on_failure {
            on_failure(condition, message);
        }
    }
}

impl std::fmt::Debug for ConnectionConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfiguration")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("use_tls", &self.use_tls)
            .field("authentication", &self.authentication)
            .field("vst_version", &self.vst_version)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("has_on_failure", &self.on_failure.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_formatting() {
        let config = ConnectionConfiguration {
            host: "db.example".to_string(),
            port: 9999,
            ..Default::default()
        };
        assert_eq!(config.address(), "db.example:9999");
    }

    #[test]
    fn test_tls_server_name_strips_brackets() {
        let config = ConnectionConfiguration {
            host: "[::1]".to_string(),
            ..Default::default()
        };
        assert_eq!(config.tls_server_name(), "::1");
        assert_eq!(config.address(), "[::1]:8529");

        let config = ConnectionConfiguration::default();
        assert_eq!(config.tls_server_name(), "127.0.0.1");
    }
}
