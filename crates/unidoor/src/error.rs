//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use unidoor_config::ConfigError;
use unidoor_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const REJECTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to controller {url}")]
    #[diagnostic(
        code(unidoor::connection_failed),
        help(
            "Check that the controller is reachable from this host.\n\
             Self-signed console? Try --insecure (-k) or pin it with controller.ca_cert."
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Notification stream failed: {message}")]
    #[diagnostic(code(unidoor::stream))]
    Stream { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(unidoor::auth_failed),
        help(
            "Verify the username and password.\n\
             Run: unidoor config set-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No password configured for controller '{host}'")]
    #[diagnostic(
        code(unidoor::no_credentials),
        help(
            "Store one with: unidoor config set-password\n\
             Or set UNIDOOR_PASSWORD, or controller.password_env in the config file."
        )
    )]
    NoCredentials { host: String },

    #[error("Not logged in to the controller")]
    #[diagnostic(code(unidoor::not_logged_in))]
    NotLoggedIn,

    // ── Controller answers ───────────────────────────────────────────
    #[error("Controller rejected the request (HTTP {status})")]
    #[diagnostic(
        code(unidoor::rejected),
        help("Check doorbell.device_id and doorbell.viewer_ids against `unidoor topology`.")
    )]
    Rejected { status: u16 },

    #[error("Topology unavailable after {attempts} attempts: {message}")]
    #[diagnostic(
        code(unidoor::topology),
        help("The failure was transport-level; it is safe to retry.")
    )]
    TopologyUnavailable { message: String, attempts: u32 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(unidoor::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found")]
    #[diagnostic(
        code(unidoor::no_config),
        help(
            "Create one with: unidoor config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(unidoor::config))]
    Config(Box<figment::Error>),

    #[error("Keyring error: {0}")]
    #[diagnostic(
        code(unidoor::keyring),
        help("No usable keyring? Use controller.password_env or UNIDOOR_PASSWORD instead.")
    )]
    Keyring(#[from] keyring::Error),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Controller did not answer within {seconds}s")]
    #[diagnostic(
        code(unidoor::timeout),
        help("Raise timing.login_timeout_secs or check controller responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    #[diagnostic(code(unidoor::json))]
    Json(#[from] serde_json::Error),

    #[error("YAML output failed: {0}")]
    #[diagnostic(code(unidoor::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(unidoor::internal))]
    Internal(String),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Stream { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::NotLoggedIn => {
                exit_code::AUTH
            }
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::NotLoggedIn => CliError::NotLoggedIn,
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::TopologyUnavailable {
                message, attempts, ..
            } => CliError::TopologyUnavailable { message, attempts },
            CoreError::Rejected { status } => CliError::Rejected { status },
            CoreError::InvalidRequest { message } => CliError::Validation {
                field: "request".into(),
                reason: message,
            },
            CoreError::Stream { message } => CliError::Stream { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { host } => CliError::NoCredentials { host },
            ConfigError::Keyring(e) => CliError::Keyring(e),
            ConfigError::Serialization(e) => CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            },
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_category() {
        assert_eq!(CliError::from(CoreError::NotLoggedIn).exit_code(), exit_code::AUTH);
        assert_eq!(
            CliError::from(CoreError::Rejected { status: 404 }).exit_code(),
            exit_code::REJECTED
        );
        assert_eq!(
            CliError::from(ConfigError::Validation {
                field: "controller.host".into(),
                reason: "must not be empty".into(),
            })
            .exit_code(),
            exit_code::USAGE
        );
        assert_eq!(
            CliError::from(CoreError::Timeout { timeout_secs: 10 }).exit_code(),
            exit_code::TIMEOUT
        );
    }
}
