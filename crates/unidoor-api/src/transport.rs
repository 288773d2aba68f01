// Shared transport configuration.
//
// One rustls `ClientConfig` feeds every path to the controller: the
// request client used for login and authenticated POSTs, the raw socket
// used for the streaming topology fetch, and the notification WebSocket.
// Plain `http://` hosts skip TLS entirely (lab setups and tests).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::error::Error;

const USER_AGENT: &str = concat!("unidoor/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Verify against the bundled webpki root store.
    System,
    /// Accept exactly the certificate in the given PEM file (self-signed
    /// controller certificates).
    PinnedCert(PathBuf),
    /// Accept any certificate (opportunistic TLS).
    DangerAcceptInvalid,
}

/// Shared transport configuration for every connection to the controller.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Bound on each login round trip and authenticated request.
    pub request_timeout: Duration,
    /// Bound on the TCP+TLS(+WebSocket) handshake of raw connections.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::DangerAcceptInvalid,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build the rustls client configuration for this TLS mode.
    pub fn tls_config(&self) -> Result<Arc<ClientConfig>, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("unsupported protocol versions: {e}")))?;

        let config = match &self.tls {
            TlsMode::System => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            TlsMode::PinnedCert(path) => {
                let pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read pinned cert: {e}")))?;
                let pinned = CertificateDer::from_pem_slice(&pem)
                    .map_err(|e| Error::Tls(format!("invalid pinned cert: {e}")))?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier {
                        pinned,
                        provider,
                    }))
                    .with_no_client_auth()
            }
            TlsMode::DangerAcceptInvalid => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
                .with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }

    /// Build the request client used for login and authenticated POSTs.
    ///
    /// Idle pooling is disabled: the controller expects a fresh connection
    /// for every step of the login protocol. Redirects are not followed so
    /// tokens are read from the controller's own answer.
    pub fn build_client(&self, tls: &Arc<ClientConfig>) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .use_preconfigured_tls(ClientConfig::clone(tls))
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(0)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

// ── Certificate verifiers ────────────────────────────────────────────

/// Accepts whatever certificate the controller presents, but still checks
/// handshake signatures so the peer must hold the matching key.
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts only the exact end-entity certificate configured by the operator.
#[derive(Debug)]
struct PinnedCertVerifier {
    pinned: CertificateDer<'static>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Raw connections ──────────────────────────────────────────────────

/// A bidirectional byte stream to the controller (TCP or TLS-over-TCP).
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncIo for T {}

pub type BoxedIo = Box<dyn AsyncIo>;

/// Host, port and security of a controller address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Derive an endpoint from an `http(s)://` or `ws(s)://` URL.
    pub fn from_url(url: &Url) -> Result<Self, Error> {
        let secure = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            other => {
                return Err(Error::Tls(format!("unsupported scheme '{other}'")));
            }
        };
        let host = url
            .host_str()
            .ok_or(Error::InvalidUrl(url::ParseError::EmptyHost))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });
        Ok(Self { secure, host, port })
    }

    /// Value for the HTTP `Host` header (port omitted when it is the default).
    pub fn authority(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// Opens raw byte streams to the controller, selecting TLS or plain TCP
/// from the endpoint. The protocol code above never branches on which.
#[derive(Clone)]
pub struct Connector {
    tls: tokio_rustls::TlsConnector,
    connect_timeout: Duration,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub fn new(tls: Arc<ClientConfig>, connect_timeout: Duration) -> Self {
        Self {
            tls: tokio_rustls::TlsConnector::from(tls),
            connect_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a fresh connection, bounded by the connect timeout.
    pub async fn open(&self, endpoint: &Endpoint) -> Result<BoxedIo, Error> {
        tokio::time::timeout(self.connect_timeout, self.open_inner(endpoint))
            .await
            .map_err(|_| Error::ConnectionFailed {
                host: endpoint.authority(),
                reason: format!("timed out after {}s", self.connect_timeout.as_secs()),
            })?
    }

    async fn open_inner(&self, endpoint: &Endpoint) -> Result<BoxedIo, Error> {
        debug!(host = %endpoint.host, port = endpoint.port, secure = endpoint.secure, "opening connection");

        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| Error::ConnectionFailed {
                host: endpoint.authority(),
                reason: e.to_string(),
            })?;
        let _ = tcp.set_nodelay(true);

        if !endpoint.secure {
            return Ok(Box::new(tcp));
        }

        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| Error::Tls(format!("invalid server name: {e}")))?;
        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::ConnectionFailed {
                host: endpoint.authority(),
                reason: format!("TLS handshake failed: {e}"),
            })?;
        Ok(Box::new(tls))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_port_from_scheme() {
        let ep = Endpoint::from_url(&Url::parse("https://192.168.1.1").unwrap()).unwrap();
        assert!(ep.secure);
        assert_eq!(ep.port, 443);
        assert_eq!(ep.authority(), "192.168.1.1");

        let ep = Endpoint::from_url(&Url::parse("http://127.0.0.1:8080/x").unwrap()).unwrap();
        assert!(!ep.secure);
        assert_eq!(ep.authority(), "127.0.0.1:8080");
    }

    #[test]
    fn endpoint_rejects_unknown_scheme() {
        let err = Endpoint::from_url(&Url::parse("ftp://host").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }

    #[test]
    fn insecure_tls_config_builds() {
        let config = TransportConfig::default();
        assert!(config.tls_config().is_ok());
    }

    #[test]
    fn pinned_cert_requires_readable_file() {
        let config = TransportConfig {
            tls: TlsMode::PinnedCert("/nonexistent/controller.pem".into()),
            ..TransportConfig::default()
        };
        assert!(matches!(config.tls_config(), Err(Error::Tls(_))));
    }
}
