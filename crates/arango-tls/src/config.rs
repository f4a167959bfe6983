//! TLS configuration options.

use rustls::pki_types::CertificateDer;

/// TLS configuration for ArangoDB connections.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Whether to trust the server certificate without validation.
    ///
    /// **Warning:** This is insecure and should only be used for testing.
    pub trust_server_certificate: bool,

    /// Custom root certificates to trust in addition to the Mozilla roots.
    pub root_certificates: Vec<CertificateDer<'static>>,

    /// Server name presented for certificate validation.
    ///
    /// If not set, the connection host name is used (RFC 2818 peer
    /// verification against the endpoint actually dialed).
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Create a new TLS configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable certificate validation (testing only).
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Add a trusted root certificate.
    #[must_use]
    pub fn add_root_certificate(mut self, certificate: CertificateDer<'static>) -> Self {
        self.root_certificates.push(certificate);
        self
    }

    /// Override the server name used for certificate validation.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}
