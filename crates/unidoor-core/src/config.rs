// ── Runtime controller configuration ──
//
// These types describe how to reach the access controller and which
// doorbell to drive. They carry credential data and timing, but never
// touch disk. The CLI constructs a `ControllerConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use unidoor_api::{ReconnectPolicy, TlsMode, TransportConfig};

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// webpki root store (strict).
    SystemDefaults,
    /// Accept exactly the certificate in this PEM file.
    PinnedCert(PathBuf),
    /// Skip verification (self-signed controllers). Default for local consoles.
    #[default]
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::PinnedCert(path) => Self::PinnedCert(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// The doorbell this bridge impersonates and the viewers it notifies.
///
/// Ids may be given either as controller ids or as MAC addresses; see
/// [`crate::device_ids`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoorbellConfig {
    pub device_id: String,
    pub device_name: String,
    pub door_name: String,
    pub viewer_ids: Vec<String>,
}

/// Control-loop cadence and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Control loop period.
    pub tick: Duration,
    /// Delay between login attempts while logged out.
    pub login_retry: Duration,
    /// How long the notification stream must be down before a reconnect.
    pub stream_retry: Duration,
    /// Consecutive stream failures that force a re-login.
    pub max_stream_failures: u32,
    /// Age after which an unanswered call is cleared.
    pub stale_call: Duration,
    /// Period of the status log line.
    pub status_report: Duration,
    /// Bound on each login round trip and authenticated POST.
    pub login_timeout: Duration,
    /// Bound on one topology fetch attempt.
    pub topology_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            login_retry: Duration::from_secs(30),
            stream_retry: Duration::from_secs(10),
            max_stream_failures: 5,
            stale_call: Duration::from_secs(300),
            status_report: Duration::from_secs(60),
            login_timeout: Duration::from_secs(10),
            topology_timeout: Duration::from_secs(30),
        }
    }
}

impl TimingConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            retry_interval: self.stream_retry,
            max_failures: self.max_stream_failures,
        }
    }
}

/// Configuration for one controller and one doorbell.
///
/// Built by the CLI and passed to [`ControllerClient`](crate::ControllerClient);
/// core never reads config files.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller URL (e.g., `https://192.168.1.1`).
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    pub tls: TlsVerification,
    pub doorbell: DoorbellConfig,
    pub timing: TimingConfig,
}

impl ControllerConfig {
    pub fn new(url: Url, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            url,
            username: username.into(),
            password,
            tls: TlsVerification::default(),
            doorbell: DoorbellConfig::default(),
            timing: TimingConfig::default(),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            request_timeout: self.timing.login_timeout,
            connect_timeout: self.timing.login_timeout,
        }
    }
}
