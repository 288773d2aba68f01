//! Notification stream over a WebSocket.
//!
//! The transport runs in its own task and hands frames to the control loop
//! through a single-slot [`Mailbox`]. The transport only does a cheap
//! substring check and a bounded copy; JSON decoding happens in
//! [`NotificationStream::drain`] on the caller's side.
//!
//! Reconnection is driven by the caller through
//! [`NotificationStream::supervise`]: a stream that stays down is retried
//! every interval, and after too many consecutive failures the caller is
//! told to log in again instead of retrying the socket.
//!
//! ```rust,ignore
//! let mut stream = NotificationStream::new(ReconnectPolicy::default());
//! stream.connect(&session)?;
//!
//! loop {
//!     match stream.supervise(Instant::now()) {
//!         SuperviseAction::Reconnect { .. } => stream.connect(&session)?,
//!         SuperviseAction::ForceRelogin { .. } => session.invalidate("stream failed"),
//!         SuperviseAction::Idle => {}
//!     }
//!     if let Some(event) = stream.drain() {
//!         // ...
//!     }
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::events::{self, DoorbellEvent};
use crate::session::ControllerSession;
use crate::transport::{Connector, Endpoint};

/// Largest frame kept by the mailbox; longer frames are truncated.
pub const MAILBOX_CAPACITY: usize = 8 * 1024;

/// Substring that marks doorbell-relevant frames.
pub const RELEVANT_MARKER: &[u8] = b"remote_view";

/// Interval between keepalive pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Silence after which the connection is considered dead.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

// ── Status ───────────────────────────────────────────────────────────

/// Connection state of the notification transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// State plus the most recent transport error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub state: StreamState,
    pub last_error: Option<String>,
}

impl StreamStatus {
    fn new(state: StreamState, last_error: Option<String>) -> Self {
        Self { state, last_error }
    }
}

/// Reconnect bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconnectCounters {
    /// Failed reconnect rounds since the last successful connection or
    /// forced re-login.
    pub consecutive_failures: u32,
    /// Every reconnect round ever started.
    pub total_reconnects: u64,
}

/// When to retry and when to give up on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// How long the stream must be down before the next attempt.
    pub retry_interval: Duration,
    /// Consecutive failures that force a re-login.
    pub max_failures: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(10),
            max_failures: 5,
        }
    }
}

/// What the caller should do after [`NotificationStream::supervise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperviseAction {
    /// Nothing to do this tick.
    Idle,
    /// Call [`NotificationStream::connect`] again.
    Reconnect { attempt: u32 },
    /// The stream was torn down; mark the session logged out and let the
    /// login path rebuild both.
    ForceRelogin { failures: u32 },
}

// ── Mailbox ──────────────────────────────────────────────────────────

/// Producer half of the mailbox, owned by the transport task.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl MailboxSender {
    /// Offer a raw frame. Irrelevant frames are ignored; a relevant frame
    /// is copied only if the slot is empty, otherwise it is dropped.
    /// Returns whether the frame was stored.
    pub fn offer(&self, frame: &[u8]) -> bool {
        if !contains(frame, RELEVANT_MARKER) {
            return false;
        }

        match self.tx.try_reserve() {
            Ok(permit) => {
                let len = frame.len().min(MAILBOX_CAPACITY);
                permit.send(Bytes::copy_from_slice(&frame[..len]));
                debug!(bytes = frame.len(), "queued doorbell frame");
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(bytes = frame.len(), "mailbox occupied, frame dropped");
                false
            }
        }
    }
}

/// Consumer half of the mailbox, owned by the control loop.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl Mailbox {
    /// Take the pending frame, if any, freeing the slot.
    pub fn take(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Frames discarded because the slot was occupied.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a single-slot mailbox.
pub fn mailbox() -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::channel(1);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        MailboxSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        Mailbox { rx, dropped },
    )
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ── NotificationStream ───────────────────────────────────────────────

struct Transport {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Long-lived notification client.
pub struct NotificationStream {
    policy: ReconnectPolicy,
    counters: ReconnectCounters,
    sender: MailboxSender,
    mailbox: Mailbox,
    /// Status of the current transport. Replaced on every connect so a
    /// stale task can never overwrite a newer connection's state.
    status: watch::Receiver<StreamStatus>,
    transport: Option<Transport>,
    last_attempt: Option<Instant>,
    /// Set by the transport on every successful handshake, cleared by
    /// `supervise`. Replaced on every connect like `status`.
    connected_seen: Arc<AtomicBool>,
}

impl std::fmt::Debug for NotificationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationStream")
            .field("status", &*self.status.borrow())
            .field("counters", &self.counters)
            .field("dropped", &self.mailbox.dropped())
            .finish_non_exhaustive()
    }
}

impl NotificationStream {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let (sender, mailbox) = mailbox();
        Self {
            policy,
            counters: ReconnectCounters::default(),
            sender,
            mailbox,
            status: detached(StreamStatus::default()),
            transport: None,
            last_attempt: None,
            connected_seen: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> StreamState {
        self.status.borrow().state
    }

    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    pub fn counters(&self) -> ReconnectCounters {
        self.counters
    }

    /// Frames lost to the single-slot policy since creation.
    pub fn dropped_frames(&self) -> u64 {
        self.mailbox.dropped()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Start a transport task for the session's notification endpoint.
    ///
    /// Returns once the task is spawned; the handshake completes (or fails)
    /// asynchronously and is reported through [`state`](Self::state).
    pub fn connect(&mut self, session: &ControllerSession) -> Result<(), Error> {
        self.stop_transport();
        self.last_attempt = Some(Instant::now());

        let cookie = session
            .session()
            .cookie_header()
            .filter(|_| session.is_logged_in());
        let Some(cookie) = cookie else {
            self.status = detached(StreamStatus::new(
                StreamState::Failed,
                Some(Error::NotLoggedIn.to_string()),
            ));
            return Err(Error::NotLoggedIn);
        };

        let url = session.notification_url()?;
        let (status_tx, status_rx) =
            watch::channel(StreamStatus::new(StreamState::Connecting, None));
        self.status = status_rx;

        self.connected_seen = Arc::new(AtomicBool::new(false));

        let cancel = CancellationToken::new();
        let task = TransportTask {
            url,
            cookie,
            connector: session.connector().clone(),
            sender: self.sender.clone(),
            status: status_tx,
            connected_seen: Arc::clone(&self.connected_seen),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        self.transport = Some(Transport { cancel, handle });
        Ok(())
    }

    /// Close the transport, if any.
    pub fn disconnect(&mut self) {
        if self.stop_transport() {
            info!("notification stream closed");
        }
        self.status = detached(StreamStatus::default());
    }

    /// Take the pending frame and decode it. Malformed frames are logged
    /// and discarded.
    pub fn drain(&mut self) -> Option<DoorbellEvent> {
        let frame = self.mailbox.take()?;
        match events::decode(&frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, bytes = frame.len(), "undecodable notification frame");
                None
            }
        }
    }

    /// Apply the reconnect policy at time `now`.
    ///
    /// Any handshake that completed since the previous call counts as a
    /// success, even if the connection has already dropped again.
    pub fn supervise(&mut self, now: Instant) -> SuperviseAction {
        if self.connected_seen.swap(false, Ordering::AcqRel)
            && self.counters.consecutive_failures != 0
        {
            debug!("notification stream connected, failures reset");
            self.counters.consecutive_failures = 0;
        }

        match self.state() {
            StreamState::Connected | StreamState::Connecting => SuperviseAction::Idle,
            StreamState::Disconnected | StreamState::Failed => {
                let due = self
                    .last_attempt
                    .is_none_or(|t| now.saturating_duration_since(t) > self.policy.retry_interval);
                if !due {
                    return SuperviseAction::Idle;
                }

                self.last_attempt = Some(now);
                self.counters.consecutive_failures += 1;
                self.counters.total_reconnects += 1;
                let failures = self.counters.consecutive_failures;

                if failures >= self.policy.max_failures {
                    warn!(failures, "notification stream keeps failing, forcing re-login");
                    self.disconnect();
                    self.counters.consecutive_failures = 0;
                    SuperviseAction::ForceRelogin { failures }
                } else {
                    info!(attempt = failures, "notification stream reconnect");
                    SuperviseAction::Reconnect { attempt: failures }
                }
            }
        }
    }

    /// Restart the failure count and retry clock (after a fresh login).
    pub fn reset_failures(&mut self, now: Instant) {
        self.counters.consecutive_failures = 0;
        self.last_attempt = Some(now);
    }

    fn stop_transport(&mut self) -> bool {
        match self.transport.take() {
            Some(transport) => {
                transport.cancel.cancel();
                drop(transport.handle);
                true
            }
            None => false,
        }
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        self.stop_transport();
    }
}

/// A status receiver with no transport behind it.
fn detached(status: StreamStatus) -> watch::Receiver<StreamStatus> {
    watch::channel(status).1
}

// ── Transport task ───────────────────────────────────────────────────

struct TransportTask {
    url: Url,
    cookie: String,
    connector: Connector,
    sender: MailboxSender,
    status: watch::Sender<StreamStatus>,
    connected_seen: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TransportTask {
    async fn run(self) {
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Ok(()),
            r = self.connect_and_read() => r,
        };

        let was_connected = self.status.borrow().state == StreamState::Connected;
        let final_status = match result {
            Ok(()) => StreamStatus::new(StreamState::Disconnected, Some("Disconnected".into())),
            Err(e) if was_connected => {
                warn!(error = %e, "notification stream dropped");
                StreamStatus::new(StreamState::Disconnected, Some(e.to_string()))
            }
            Err(e) => {
                warn!(error = %e, "notification stream connect failed");
                StreamStatus::new(StreamState::Failed, Some(e.to_string()))
            }
        };
        self.status.send_replace(final_status);
        debug!("notification transport exiting");
    }

    async fn connect_and_read(&self) -> Result<(), Error> {
        info!(url = %self.url, "connecting notification stream");

        let endpoint = Endpoint::from_url(&self.url)?;
        let io = self.connector.open(&endpoint).await?;

        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;
        let request = ClientRequestBuilder::new(uri).with_header("Cookie", self.cookie.as_str());

        let handshake = tokio_tungstenite::client_async(request, io);
        let (ws_stream, _response) = tokio::time::timeout(self.connector.connect_timeout(), handshake)
            .await
            .map_err(|_| Error::WebSocketConnect("handshake timed out".into()))?
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        info!("notification stream connected");
        self.connected_seen.store(true, Ordering::Release);
        self.status
            .send_replace(StreamStatus::new(StreamState::Connected, None));

        let (mut write, mut read) = ws_stream.split();
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_INTERVAL,
            PING_INTERVAL,
        );
        let idle = tokio::time::sleep(IDLE_TIMEOUT);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok(());
                }
                () = &mut idle => {
                    return Err(Error::WebSocketConnect(format!(
                        "no traffic for {}s", IDLE_TIMEOUT.as_secs()
                    )));
                }
                _ = ping.tick() => {
                    trace!("notification ping");
                    write
                        .send(tungstenite::Message::Ping(Bytes::new()))
                        .await
                        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                }
                frame = read.next() => {
                    idle.as_mut().reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
                    match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            self.sender.offer(text.as_bytes());
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            if let Some(cf) = frame {
                                info!(code = %cf.code, reason = %cf.reason, "notification stream closed by controller");
                            }
                            return Ok(());
                        }
                        Some(Ok(_)) => {
                            // Binary, ping, pong: keepalive only.
                        }
                        Some(Err(e)) => {
                            return Err(Error::WebSocketConnect(e.to_string()));
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const RING: &[u8] =
        br#"{"event":"access.remote_view","data":{"request_id":"r1","device_id":"d1"}}"#;
    const RING_2: &[u8] =
        br#"{"event":"access.remote_view","data":{"request_id":"r2","device_id":"d1"}}"#;

    #[test]
    fn mailbox_keeps_first_frame_and_drops_second() {
        let mut stream = NotificationStream::new(ReconnectPolicy::default());

        assert!(stream.sender.offer(RING));
        assert!(!stream.sender.offer(RING_2));

        assert_eq!(
            stream.drain(),
            Some(DoorbellEvent::Ring {
                request_id: "r1".into(),
                device_id: "d1".into(),
                peer_id: None,
            })
        );
        assert_eq!(stream.drain(), None);
        assert_eq!(stream.dropped_frames(), 1);

        // Slot is free again.
        assert!(stream.sender.offer(RING_2));
        assert!(matches!(stream.drain(), Some(DoorbellEvent::Ring { request_id, .. }) if request_id == "r2"));
    }

    #[test]
    fn irrelevant_frames_never_occupy_the_slot() {
        let (sender, mut mailbox) = mailbox();
        assert!(!sender.offer(br#"{"event":"access.device.update"}"#));
        assert!(!sender.offer(b"\"Hello\""));
        assert!(mailbox.take().is_none());
        assert_eq!(mailbox.dropped(), 0);
    }

    #[test]
    fn oversized_frames_are_truncated() {
        let (sender, mut mailbox) = mailbox();
        let mut frame = b"remote_view".to_vec();
        frame.resize(MAILBOX_CAPACITY * 2, b'x');

        assert!(sender.offer(&frame));
        assert_eq!(mailbox.take().unwrap().len(), MAILBOX_CAPACITY);
    }

    #[test]
    fn truncated_frame_fails_decoding_quietly() {
        let mut stream = NotificationStream::new(ReconnectPolicy::default());
        let mut frame = br#"{"event":"access.remote_view","data":{"request_id":""#.to_vec();
        frame.resize(MAILBOX_CAPACITY + 10, b'a');

        assert!(stream.sender.offer(&frame));
        assert_eq!(stream.drain(), None);
    }

    #[test]
    fn fifth_failure_forces_relogin_and_resets_counter() {
        let mut stream = NotificationStream::new(ReconnectPolicy::default());
        let start = Instant::now();
        stream.reset_failures(start);
        let step = Duration::from_secs(11);

        // Within the retry interval nothing happens.
        assert_eq!(stream.supervise(start + Duration::from_secs(5)), SuperviseAction::Idle);

        for attempt in 1..=4 {
            let now = start + step * attempt;
            assert_eq!(stream.supervise(now), SuperviseAction::Reconnect { attempt });
            assert_eq!(stream.counters().consecutive_failures, attempt);
        }

        assert_eq!(
            stream.supervise(start + step * 5),
            SuperviseAction::ForceRelogin { failures: 5 }
        );
        assert_eq!(stream.counters().consecutive_failures, 0);
        assert_eq!(stream.counters().total_reconnects, 5);
        assert_eq!(stream.state(), StreamState::Disconnected);
    }

    #[test]
    fn reconnect_is_not_due_before_interval() {
        let mut stream = NotificationStream::new(ReconnectPolicy::default());
        let start = Instant::now();
        stream.reset_failures(start);

        assert_eq!(stream.supervise(start + Duration::from_secs(10)), SuperviseAction::Idle);
        assert_eq!(
            stream.supervise(start + Duration::from_millis(10_001)),
            SuperviseAction::Reconnect { attempt: 1 }
        );
        assert_eq!(stream.supervise(start + Duration::from_secs(15)), SuperviseAction::Idle);
    }

    #[test]
    fn stream_state_display() {
        assert_eq!(StreamState::Connected.to_string(), "connected");
        assert_eq!(StreamState::Failed.to_string(), "failed");
    }
}
