// ── Core error types ──
//
// Operator-facing errors from unidoor-core. Consumers never see chunk
// framing or raw socket failures directly; the `From<unidoor_api::Error>`
// impl folds transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to controller at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Not logged in to the controller")]
    NotLoggedIn,

    #[error("Controller did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Topology unavailable after {attempts} attempts: {message}")]
    TopologyUnavailable {
        message: String,
        attempts: u32,
        /// Safe to ask again; the failure was transport-level.
        can_retry: bool,
    },

    #[error("Controller rejected the request (HTTP {status})")]
    Rejected { status: u16 },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Notification stream error: {message}")]
    Stream { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether re-running the login protocol may clear this error.
    pub fn needs_login(&self) -> bool {
        matches!(self, Self::NotLoggedIn | Self::AuthenticationFailed { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<unidoor_api::AuthError> for CoreError {
    fn from(err: unidoor_api::AuthError) -> Self {
        match err {
            unidoor_api::AuthError::ConnectionFailed(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            unidoor_api::AuthError::InvalidCredentials => CoreError::AuthenticationFailed {
                message: err.to_string(),
            },
        }
    }
}

impl From<unidoor_api::Error> for CoreError {
    fn from(err: unidoor_api::Error) -> Self {
        use unidoor_api::Error as Api;

        match err {
            Api::Auth(auth) => auth.into(),
            Api::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            Api::NotLoggedIn => CoreError::NotLoggedIn,
            Api::ConnectionFailed { host, reason } => CoreError::ConnectionFailed { url: host, reason },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else {
                    CoreError::ConnectionFailed {
                        url: e.url().map(ToString::to_string).unwrap_or_default(),
                        reason: e.to_string(),
                    }
                }
            }
            Api::Io(e) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: e.to_string(),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Http { status } => CoreError::Rejected { status },
            Api::MalformedResponse(message) => CoreError::Internal(format!("Malformed response: {message}")),
            e @ (Api::ChunkFraming | Api::IncompleteTopology | Api::Parse(_)) => {
                CoreError::TopologyUnavailable {
                    message: e.to_string(),
                    attempts: 1,
                    can_retry: true,
                }
            }
            e @ (Api::WebSocketConnect(_) | Api::ReconnectExhausted { .. }) => CoreError::Stream {
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use unidoor_api::{AuthError, Error};

    #[test]
    fn session_expiry_needs_login() {
        let err = CoreError::from(Error::SessionExpired);
        assert!(err.needs_login());
        assert!(CoreError::from(AuthError::InvalidCredentials).needs_login());
    }

    #[test]
    fn non_2xx_is_rejected() {
        assert!(matches!(
            CoreError::from(Error::Http { status: 403 }),
            CoreError::Rejected { status: 403 }
        ));
    }

    #[test]
    fn body_errors_are_retryable_topology_failures() {
        for err in [Error::ChunkFraming, Error::IncompleteTopology] {
            assert!(matches!(
                CoreError::from(err),
                CoreError::TopologyUnavailable { can_retry: true, .. }
            ));
        }
    }

    #[test]
    fn connection_failure_keeps_reason() {
        let err = CoreError::from(AuthError::ConnectionFailed("refused".into()));
        assert!(matches!(err, CoreError::ConnectionFailed { reason, .. } if reason == "refused"));
    }
}
