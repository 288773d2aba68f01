//! Configuration for the unidoor bridge.
//!
//! A TOML file in the platform config directory, overridden by
//! `UNIDOOR_`-prefixed environment variables, resolved into a
//! `unidoor_core::ControllerConfig`. Passwords come from an environment
//! variable, the system keyring or (last) the file itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use unidoor_core::{ControllerConfig, DoorbellConfig, TimingConfig, TlsVerification};

/// Keyring service name; entries are keyed by controller host.
pub const KEYRING_SERVICE: &str = "unidoor";
/// Environment variable consulted when `password_env` is unset or empty.
pub const PASSWORD_ENV: &str = "UNIDOOR_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for controller '{host}'")]
    NoCredentials { host: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerSection,

    #[serde(default)]
    pub doorbell: DoorbellSection,

    #[serde(default)]
    pub timing: TimingSection,
}

/// `[controller]`: where and as whom to log in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControllerSection {
    /// Host name, `host:port`, or a full `https://` URL.
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub username: String,

    /// Plaintext password (prefer the keyring or `password_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// PEM file with the controller certificate to pin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// `true` accepts any certificate, `false` verifies against the
    /// webpki roots. Unset means insecure unless `ca_cert` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
}

/// `[doorbell]`: the doorbell to impersonate and who to ring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DoorbellSection {
    /// Controller id or MAC address of the doorbell.
    #[serde(default)]
    pub device_id: String,

    #[serde(default)]
    pub device_name: String,

    #[serde(default)]
    pub door_name: String,

    /// Controller ids or MAC addresses of up to four viewers.
    #[serde(default)]
    pub viewer_ids: Vec<String>,
}

/// `[timing]`: control-loop overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingSection {
    pub tick_ms: u64,
    pub login_retry_secs: u64,
    pub stream_retry_secs: u64,
    pub max_stream_failures: u32,
    pub stale_call_secs: u64,
    pub status_report_secs: u64,
    pub login_timeout_secs: u64,
    pub topology_timeout_secs: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        let timing = TimingConfig::default();
        Self {
            tick_ms: millis(timing.tick),
            login_retry_secs: timing.login_retry.as_secs(),
            stream_retry_secs: timing.stream_retry.as_secs(),
            max_stream_failures: timing.max_stream_failures,
            stale_call_secs: timing.stale_call.as_secs(),
            status_report_secs: timing.status_report.as_secs(),
            login_timeout_secs: timing.login_timeout.as_secs(),
            topology_timeout_secs: timing.topology_timeout.as_secs(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl TimingSection {
    fn to_timing(&self) -> Result<TimingConfig, ConfigError> {
        let positive = |field: &str, value: u64| {
            if value == 0 {
                Err(validation(format!("timing.{field}"), "must be greater than zero"))
            } else {
                Ok(value)
            }
        };

        if self.max_stream_failures == 0 {
            return Err(validation(
                "timing.max_stream_failures",
                "must be greater than zero",
            ));
        }

        Ok(TimingConfig {
            tick: Duration::from_millis(positive("tick_ms", self.tick_ms)?),
            login_retry: Duration::from_secs(positive("login_retry_secs", self.login_retry_secs)?),
            stream_retry: Duration::from_secs(positive("stream_retry_secs", self.stream_retry_secs)?),
            max_stream_failures: self.max_stream_failures,
            stale_call: Duration::from_secs(positive("stale_call_secs", self.stale_call_secs)?),
            status_report: Duration::from_secs(positive(
                "status_report_secs",
                self.status_report_secs,
            )?),
            login_timeout: Duration::from_secs(positive(
                "login_timeout_secs",
                self.login_timeout_secs,
            )?),
            topology_timeout: Duration::from_secs(positive(
                "topology_timeout_secs",
                self.topology_timeout_secs,
            )?),
        })
    }
}

fn validation(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "unidoor", "unidoor").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("unidoor");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from `path` merged over defaults, then environment
/// overrides such as `UNIDOOR_CONTROLLER__HOST` or
/// `UNIDOOR_DOORBELL__DEVICE_ID`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("UNIDOOR_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load the config from the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Controller URL ──────────────────────────────────────────────────

/// Turn `host`, `host:port` or a full URL into the controller base URL.
/// Bare hosts default to `https`.
pub fn controller_url(host: &str) -> Result<Url, ConfigError> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(validation("controller.host", "must not be empty"));
    }

    let candidate = if host.contains("://") {
        host.to_owned()
    } else {
        format!("https://{host}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| validation("controller.host", format!("invalid URL '{host}': {e}")))?;

    match url.scheme() {
        "https" | "http" if url.host_str().is_some() => Ok(url),
        _ => Err(validation(
            "controller.host",
            format!("expected an http(s) controller address, got '{host}'"),
        )),
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Keyring account name for a controller host.
pub fn keyring_account(host: &str) -> String {
    host.trim().trim_end_matches('/').to_owned()
}

/// Resolve the password: `password_env` → `UNIDOOR_PASSWORD` → keyring →
/// plaintext.
pub fn resolve_password(controller: &ControllerSection) -> Result<SecretString, ConfigError> {
    resolve_password_with(
        controller,
        |name| std::env::var(name).ok(),
        |account| {
            keyring::Entry::new(KEYRING_SERVICE, account)
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

/// [`resolve_password`] with injectable environment and keyring lookups.
pub fn resolve_password_with(
    controller: &ControllerSection,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

    // 1. Configured env var
    if let Some(name) = controller.password_env.as_deref().filter(|n| !n.is_empty()) {
        if let Some(pw) = non_empty(env(name)) {
            debug!(var = name, "password from environment");
            return Ok(SecretString::from(pw));
        }
    }

    // 2. Default env var
    if let Some(pw) = non_empty(env(PASSWORD_ENV)) {
        debug!(var = PASSWORD_ENV, "password from environment");
        return Ok(SecretString::from(pw));
    }

    // 3. System keyring
    if let Some(pw) = non_empty(keyring(&keyring_account(&controller.host))) {
        debug!("password from keyring");
        return Ok(SecretString::from(pw));
    }

    // 4. Plaintext in config
    if let Some(pw) = non_empty(controller.password.clone()) {
        return Ok(SecretString::from(pw));
    }

    Err(ConfigError::NoCredentials {
        host: controller.host.clone(),
    })
}

/// Store a controller password in the system keyring.
pub fn store_password(host: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_account(host))?;
    entry.set_password(password)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// TLS strategy from `insecure` and `ca_cert`.
    pub fn tls(&self) -> TlsVerification {
        match (self.controller.insecure, &self.controller.ca_cert) {
            (Some(true), _) | (None, None) => TlsVerification::DangerAcceptInvalid,
            (_, Some(path)) => TlsVerification::PinnedCert(path.clone()),
            (Some(false), None) => TlsVerification::SystemDefaults,
        }
    }

    /// Check fields that do not need the network or the keyring.
    pub fn validate(&self) -> Result<(), ConfigError> {
        controller_url(&self.controller.host)?;
        if self.controller.username.trim().is_empty() {
            return Err(validation("controller.username", "must not be empty"));
        }
        if let Some(path) = &self.controller.ca_cert {
            if !path.is_file() {
                return Err(validation(
                    "controller.ca_cert",
                    format!("{} is not a readable file", path.display()),
                ));
            }
        }
        self.timing.to_timing()?;
        Ok(())
    }

    pub fn doorbell(&self) -> DoorbellConfig {
        DoorbellConfig {
            device_id: self.doorbell.device_id.clone(),
            device_name: self.doorbell.device_name.clone(),
            door_name: self.doorbell.door_name.clone(),
            viewer_ids: self.doorbell.viewer_ids.clone(),
        }
    }

    /// Build a `ControllerConfig` with an already resolved password.
    pub fn to_controller_config_with(
        &self,
        password: SecretString,
    ) -> Result<ControllerConfig, ConfigError> {
        self.validate()?;

        let url = controller_url(&self.controller.host)?;
        let mut config = ControllerConfig::new(url, self.controller.username.trim(), password);
        config.tls = self.tls();
        config.doorbell = self.doorbell();
        config.timing = self.timing.to_timing()?;
        Ok(config)
    }

    /// Build a `ControllerConfig`, resolving the password chain.
    pub fn to_controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        self.validate()?;
        let password = resolve_password(&self.controller)?;
        self.to_controller_config_with(password)
    }
}
