// Controller session: two-phase login and authenticated requests.
//
// Login is `GET /` (harvest the CSRF token) followed by a JSON
// `POST /api/auth/login` on a fresh connection. The controller answers
// with a `TOKEN` session cookie and a rotated CSRF token; both are then
// attached by hand to every authenticated request. The session never
// refreshes itself: callers see `SessionExpired`/`NotLoggedIn` and log in
// again.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::chunked::ChunkedTransferDecoder;
use crate::error::{AuthError, Error};
use crate::http::{self, RawRequest, header_str};
use crate::topology::{self, Topology};
use crate::transport::{Connector, Endpoint, TransportConfig};

// ── Controller paths ─────────────────────────────────────────────────

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const TOPOLOGY_PATH: &str = "/proxy/access/api/v2/devices/topology4";
pub const NOTIFICATION_PATH: &str = "/proxy/access/api/v2/ws/notification";

/// `POST` target that starts a call from a doorbell device.
pub fn remote_call_path(device_id: &str) -> String {
    format!("/proxy/access/api/v2/device/{device_id}/remote_call")
}

/// `POST` target that answers (denies) a call on a device.
pub fn reply_remote_path(device_id: &str) -> String {
    format!("/proxy/access/api/v2/device/{device_id}/reply_remote")
}

const SESSION_COOKIE: &str = "TOKEN";
const CSRF_HEADER: &str = "X-Csrf-Token";
const UPDATED_CSRF_HEADER: &str = "X-Updated-Csrf-Token";

/// Normalize a configured controller host into a base URL. Bare hosts
/// default to `https://`.
pub fn controller_url(host: &str) -> Result<Url, Error> {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        Ok(Url::parse(host)?)
    } else {
        Ok(Url::parse(&format!("https://{host}"))?)
    }
}

/// Login credentials, fixed for the lifetime of a [`ControllerSession`].
#[derive(Debug, Clone)]
pub struct Credentials {
    pub host: Url,
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(host: &str, username: impl Into<String>, password: SecretString) -> Result<Self, Error> {
        Ok(Self {
            host: controller_url(host)?,
            username: username.into(),
            password,
        })
    }
}

/// Authentication state owned by [`ControllerSession`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Anti-forgery token; rotated by the controller on most responses.
    pub csrf_token: String,
    /// Value of the `TOKEN` cookie. Empty means unauthenticated.
    pub session_cookie: String,
    /// Username echoed back as display name and user id.
    pub identity: String,
    pub logged_in: bool,
    /// Last failure, cleared when a new login attempt starts.
    pub last_error: Option<String>,
}

impl Session {
    /// `Cookie` header value for authenticated requests.
    pub fn cookie_header(&self) -> Option<String> {
        (!self.session_cookie.is_empty()).then(|| format!("{SESSION_COOKIE}={}", self.session_cookie))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("csrf_token", &(!self.csrf_token.is_empty()))
            .field("session_cookie", &"[REDACTED]")
            .field("identity", &self.identity)
            .field("logged_in", &self.logged_in)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Owns the session state and every request path that uses it.
pub struct ControllerSession {
    credentials: Credentials,
    endpoint: Endpoint,
    http: reqwest::Client,
    connector: Connector,
    request_timeout: Duration,
    session: Session,
}

impl fmt::Debug for ControllerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerSession")
            .field("host", &self.credentials.host.as_str())
            .field("username", &self.credentials.username)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ControllerSession {
    /// Build the session's clients. No I/O happens until [`login`](Self::login).
    pub fn new(credentials: Credentials, transport: &TransportConfig) -> Result<Self, Error> {
        let tls = transport.tls_config()?;
        let http = transport.build_client(&tls)?;
        let connector = Connector::new(tls, transport.connect_timeout);
        let endpoint = Endpoint::from_url(&credentials.host)?;

        Ok(Self {
            credentials,
            endpoint,
            http,
            connector,
            request_timeout: transport.request_timeout,
            session: Session::default(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.logged_in
    }

    pub fn base_url(&self) -> &Url {
        &self.credentials.host
    }

    /// Opens raw connections with this session's TLS settings.
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Secure WebSocket URL of the notification stream.
    pub fn notification_url(&self) -> Result<Url, Error> {
        let mut url = self.credentials.host.join(NOTIFICATION_PATH)?;
        let scheme = if self.endpoint.secure { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| Error::Tls(format!("cannot use scheme {scheme} for {url}")))?;
        Ok(url)
    }

    /// Mark the session unauthenticated (forced re-login).
    pub fn invalidate(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "session invalidated");
        self.session.logged_in = false;
        self.session.session_cookie.clear();
        self.session.last_error = Some(reason);
    }

    /// Record an operator-visible failure without changing login state.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.session.last_error = Some(message.into());
    }

    // ── Login ────────────────────────────────────────────────────────

    /// Run the two-phase login protocol.
    pub async fn login(&mut self) -> Result<Session, AuthError> {
        self.session.last_error = None;

        match self.login_inner().await {
            Ok(()) => {
                info!(user = %self.session.identity, "logged in");
                Ok(self.session.clone())
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                self.session.logged_in = false;
                self.session.session_cookie.clear();
                self.session.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn login_inner(&mut self) -> Result<(), AuthError> {
        let base = self.credentials.host.clone();

        // Step 1: plain GET for the initial CSRF token.
        debug!(url = %base, "requesting CSRF token");
        let resp = self.http.get(base.clone()).send().await.map_err(connection_failed)?;
        let mut csrf = header_str(resp.headers(), CSRF_HEADER)
            .map(str::to_owned)
            .unwrap_or_default();
        // Read the page to completion; the connection is not reused.
        let _ = resp.bytes().await;
        trace!(has_csrf = !csrf.is_empty(), "initial CSRF token");

        // Step 2: credentials on a fresh connection.
        let url = base.join(LOGIN_PATH).map_err(|e| AuthError::ConnectionFailed(e.to_string()))?;
        let body = json!({
            "username": self.credentials.username,
            "password": self.credentials.password.expose_secret(),
            "token": "",
            "rememberMe": true,
        });
        let mut request = self.http.post(url).json(&body);
        if !csrf.is_empty() {
            request = request.header(CSRF_HEADER, &csrf);
        }
        let resp = request.send().await.map_err(connection_failed)?;
        let status = resp.status();

        // Step 3: rotated token and session cookie.
        if let Some(token) = rotated_csrf(resp.headers()) {
            csrf = token.to_owned();
        }
        let cookie = session_cookie(resp.headers()).unwrap_or_default();
        let _ = resp.bytes().await;

        if cookie.is_empty() {
            debug!(status = status.as_u16(), "login response carried no session cookie");
            return Err(AuthError::InvalidCredentials);
        }

        // Step 4.
        self.session = Session {
            csrf_token: csrf,
            session_cookie: cookie,
            identity: self.credentials.username.clone(),
            logged_in: true,
            last_error: None,
        };
        Ok(())
    }

    // ── Authenticated requests ───────────────────────────────────────

    /// `POST` a JSON body with the session cookie and CSRF token.
    /// Succeeds only on a 2xx answer.
    pub async fn post_json<T: Serialize + ?Sized>(
        &mut self,
        path: &str,
        body: &T,
    ) -> Result<StatusCode, Error> {
        let cookie = self.session.cookie_header().filter(|_| self.session.logged_in);
        let Some(cookie) = cookie else {
            return Err(Error::NotLoggedIn);
        };

        let url = self.credentials.host.join(path)?;
        debug!(url = %url, "POST");

        let mut request = self
            .http
            .post(url)
            .header(header::COOKIE, cookie)
            .json(body);
        if !self.session.csrf_token.is_empty() {
            request = request.header(CSRF_HEADER, &self.session.csrf_token);
        }

        let resp = request.send().await.map_err(|e| self.transport_error(e))?;
        self.update_csrf_from_response(resp.headers());

        let status = resp.status();
        let _ = resp.bytes().await;
        trace!(status = status.as_u16(), "POST answered");
        check_status(status)?;
        Ok(status)
    }

    /// Fetch and parse the device topology once.
    ///
    /// Uses a raw connection so the body is decoded straight from the
    /// socket and never buffered whole.
    pub async fn fetch_topology_once(&mut self) -> Result<Topology, Error> {
        let cookie = self.session.cookie_header().filter(|_| self.session.logged_in);
        let Some(cookie) = cookie else {
            return Err(Error::NotLoggedIn);
        };

        let mut request = RawRequest::get(TOPOLOGY_PATH)
            .header("Accept", "application/json")
            .header("Cookie", cookie);
        if !self.session.csrf_token.is_empty() {
            request = request.header(CSRF_HEADER, self.session.csrf_token.clone());
        }

        let io = self.connector.open(&self.endpoint).await?;
        let response = http::send(io, &self.endpoint, &request).await?;
        self.update_csrf_from_response(&response.head.headers);
        check_status(response.head.status)?;

        let chunked = response.head.is_chunked();
        debug!(chunked, content_length = ?response.head.content_length(), "topology response");

        let decoder = match (chunked, response.head.content_length()) {
            (false, Some(len)) => ChunkedTransferDecoder::with_content_length(response.body, len),
            _ => ChunkedTransferDecoder::new(response.body, chunked),
        };
        topology::read_topology(decoder).await
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Update CSRF token if the response contains a rotated value.
    fn update_csrf_from_response(&mut self, headers: &HeaderMap) {
        if let Some(token) = rotated_csrf(headers) {
            trace!("CSRF token rotated");
            self.session.csrf_token = token.to_owned();
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                timeout_secs: self.request_timeout.as_secs(),
            }
        } else if e.is_connect() {
            Error::ConnectionFailed {
                host: self.endpoint.authority(),
                reason: e.to_string(),
            }
        } else {
            Error::Transport(e)
        }
    }
}

fn connection_failed(e: reqwest::Error) -> AuthError {
    AuthError::ConnectionFailed(e.to_string())
}

fn check_status(status: StatusCode) -> Result<(), Error> {
    if status == StatusCode::UNAUTHORIZED {
        Err(Error::SessionExpired)
    } else if status.is_success() {
        Ok(())
    } else {
        Err(Error::Http {
            status: status.as_u16(),
        })
    }
}

/// Prefer `X-Updated-Csrf-Token`, falling back to `X-Csrf-Token`.
fn rotated_csrf(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, UPDATED_CSRF_HEADER)
        .or_else(|| header_str(headers, CSRF_HEADER))
        .filter(|t| !t.is_empty())
}

/// Value of the first `TOKEN` cookie among the `Set-Cookie` headers, up to
/// the first `;`.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let prefix = format!("{SESSION_COOKIE}=");
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| {
            let v = v.trim_start();
            v.strip_prefix(&prefix)
                .map(|rest| rest.split(';').next().unwrap_or_default().trim().to_owned())
        })
}
