use thiserror::Error;

/// Why a login attempt did not produce an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// TCP/TLS establishment or the HTTP round trip failed. The caller
    /// retries on its own schedule; the session never retries internally.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The controller answered but did not hand out a `TOKEN` cookie.
    #[error("Login failed: controller did not issue a session cookie")]
    InvalidCredentials,
}

/// Top-level error type for the `unidoor-api` crate.
///
/// Covers every failure mode of the controller client: login, authenticated
/// requests, chunked body decoding, filtered JSON extraction and the
/// notification stream. `unidoor-core` maps these into operator-facing
/// diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The controller rejected the session cookie (HTTP 401).
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// An authenticated call was attempted without a session.
    #[error("Not logged in")]
    NotLoggedIn,

    // ── Transport ───────────────────────────────────────────────────
    /// TCP/TLS establishment failure on an authenticated request.
    #[error("Connection to {host} failed: {reason}")]
    ConnectionFailed { host: String, reason: String },

    /// HTTP transport error from the request client.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Raw socket error on the streaming paths.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS configuration or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-2xx answer from the controller.
    #[error("Controller answered HTTP {status}")]
    Http { status: u16 },

    /// The response head could not be parsed.
    #[error("Malformed HTTP response: {0}")]
    MalformedResponse(String),

    // ── Topology body ───────────────────────────────────────────────
    /// A chunk-size line was not valid hexadecimal.
    #[error("Malformed chunked transfer framing")]
    ChunkFraming,

    /// The body ended (or stalled) before the document was complete.
    #[error("Topology document ended before it was complete")]
    IncompleteTopology,

    /// The document was not valid JSON or did not have the expected shape.
    #[error("Topology parse error: {0}")]
    Parse(String),

    // ── Notification stream ─────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The stream failed repeatedly; the session is considered stale.
    #[error("Notification stream failed {failures} times in a row")]
    ReconnectExhausted { failures: u32 },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired
                | Self::NotLoggedIn
                | Self::Auth(AuthError::InvalidCredentials)
                | Self::ReconnectExhausted { .. }
        )
    }

    /// Returns `true` if a fetch-level retry can make progress.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::Auth(AuthError::ConnectionFailed(_))
            | Self::ConnectionFailed { .. }
            | Self::Io(_)
            | Self::Timeout { .. }
            | Self::MalformedResponse(_)
            | Self::ChunkFraming
            | Self::IncompleteTopology
            | Self::Parse(_)
            | Self::WebSocketConnect(_) => true,
            Self::Http { status } => *status >= 500,
            _ => false,
        }
    }
}
