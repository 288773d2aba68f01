// ── Controller facade ──
//
// `ControllerClient` owns the session, the notification stream and the
// active call. It is driven by a single task (the `Supervisor` or a CLI
// command) that calls its methods one after another; nothing here is
// shared across tasks except the broadcast of doorbell updates.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use unidoor_api::session::{remote_call_path, reply_remote_path};
use unidoor_api::{
    ControllerSession, Credentials, DoorbellEvent, NotificationStream, StreamState,
    SuperviseAction, Topology,
};

use crate::call::{ActiveCall, ActiveCallTracker};
use crate::config::ControllerConfig;
use crate::device_ids::{self, DeviceIds};
use crate::error::CoreError;
use crate::requests::{RemoteCallRequest, ReplyRemoteRequest};
use crate::status::{ControllerStatus, DoorbellUpdate, IdleReason};

const UPDATE_CHANNEL_SIZE: usize = 64;
const TOPOLOGY_ATTEMPTS: u32 = 3;
const TOPOLOGY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The doorbell bridge's view of one access controller.
pub struct ControllerClient {
    config: ControllerConfig,
    session: ControllerSession,
    stream: NotificationStream,
    calls: ActiveCallTracker,
    device_ids: DeviceIds,
    updates: broadcast::Sender<DoorbellUpdate>,
}

impl std::fmt::Debug for ControllerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerClient")
            .field("url", &self.config.url.as_str())
            .field("session", &self.session)
            .field("stream", &self.stream)
            .field("active_call", &self.calls.active())
            .finish_non_exhaustive()
    }
}

impl ControllerClient {
    /// Build the client. Does not touch the network; call
    /// [`establish()`](Self::establish) or [`login()`](Self::login).
    pub fn new(config: ControllerConfig) -> Result<Self, CoreError> {
        let credentials = Credentials {
            host: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        };
        let session = ControllerSession::new(credentials, &config.transport())?;
        let stream = NotificationStream::new(config.timing.reconnect_policy());
        let calls = ActiveCallTracker::new(config.timing.stale_call);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);

        Ok(Self {
            config,
            session,
            stream,
            calls,
            device_ids: DeviceIds::default(),
            updates,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn session(&self) -> &ControllerSession {
        &self.session
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.session.session().last_error.as_deref()
    }

    pub fn active_call(&self) -> Option<&ActiveCall> {
        self.calls.active()
    }

    pub fn device_ids(&self) -> &DeviceIds {
        &self.device_ids
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    /// Subscribe to ring / idle transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<DoorbellUpdate> {
        self.updates.subscribe()
    }

    pub(crate) fn update_sender(&self) -> broadcast::Sender<DoorbellUpdate> {
        self.updates.clone()
    }

    /// Snapshot for status surfaces.
    pub fn status(&self, now: Instant) -> ControllerStatus {
        let session = self.session.session();
        let counters = self.stream.counters();
        ControllerStatus {
            logged_in: session.logged_in,
            identity: session.identity.clone(),
            last_error: session.last_error.clone(),
            stream_state: self.stream.state(),
            consecutive_failures: counters.consecutive_failures,
            total_reconnects: counters.total_reconnects,
            dropped_frames: self.stream.dropped_frames(),
            active_call: self.calls.active().map(|call| call.summary(now)),
        }
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Run the login protocol, bounded by two login round trips.
    pub async fn login(&mut self) -> Result<(), CoreError> {
        let timeout = self.config.timing.login_timeout * 2;
        match tokio::time::timeout(timeout, self.session.login()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                self.session.record_error("login timed out");
                Err(CoreError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Resolve the configured doorbell and viewer ids.
    pub fn bootstrap_device_ids(&mut self) {
        self.device_ids = device_ids::resolve(&self.config.doorbell);
    }

    /// Log in, resolve device ids and open the notification stream.
    ///
    /// A stream that fails to start is left to
    /// [`supervise_stream()`](Self::supervise_stream); only login failures
    /// are returned. The stream retry clock starts when login returns, not
    /// when it was requested.
    pub async fn establish(&mut self) -> Result<(), CoreError> {
        self.login().await?;
        self.bootstrap_device_ids();

        if let Err(e) = self.stream.connect(&self.session) {
            warn!(error = %e, "notification stream did not start");
        }
        self.stream.reset_failures(Instant::now());
        Ok(())
    }

    /// Close the notification stream.
    pub fn disconnect(&mut self) {
        self.stream.disconnect();
    }

    // ── Notification stream ──────────────────────────────────────────

    /// Apply the stream reconnect policy. A forced re-login marks the
    /// session logged out; the caller's login path rebuilds both.
    pub fn supervise_stream(&mut self, now: Instant) -> SuperviseAction {
        if !self.session.is_logged_in() {
            return SuperviseAction::Idle;
        }

        let action = self.stream.supervise(now);
        match action {
            SuperviseAction::Reconnect { attempt } => {
                if let Err(e) = self.stream.connect(&self.session) {
                    warn!(attempt, error = %e, "notification stream reconnect failed");
                }
            }
            SuperviseAction::ForceRelogin { failures } => {
                let reason = unidoor_api::Error::ReconnectExhausted { failures };
                self.session.invalidate(reason.to_string());
            }
            SuperviseAction::Idle => {}
        }
        action
    }

    /// Take the pending notification, if any, and apply it.
    pub fn drain_events(&mut self, now: Instant) -> Option<DoorbellUpdate> {
        let event = self.stream.drain()?;
        self.apply_event(event, now)
    }

    /// Apply a decoded doorbell event to the active call.
    pub fn apply_event(&mut self, event: DoorbellEvent, now: Instant) -> Option<DoorbellUpdate> {
        let update = match event {
            DoorbellEvent::Ring {
                request_id,
                device_id,
                peer_id,
            } => {
                let call = self
                    .calls
                    .on_ring_event(&request_id, &device_id, peer_id.as_deref(), now);
                DoorbellUpdate::Ringing(call.clone())
            }
            DoorbellEvent::End { request_id } => {
                if !self.calls.on_end_event(&request_id) {
                    return None;
                }
                DoorbellUpdate::Idle {
                    reason: IdleReason::Ended,
                }
            }
        };
        self.publish(update.clone());
        Some(update)
    }

    /// Clear a stale call. Returns whether one was cleared.
    pub fn tick(&mut self, now: Instant) -> bool {
        let cleared = self.calls.tick(now);
        if cleared {
            self.publish(DoorbellUpdate::Idle {
                reason: IdleReason::Stale,
            });
        }
        cleared
    }

    fn publish(&self, update: DoorbellUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    // ── Remote calls ─────────────────────────────────────────────────

    /// Ring the configured viewers as the configured doorbell. Returns the
    /// generated request id.
    pub async fn trigger_ring(&mut self) -> Result<String, CoreError> {
        self.require_login()?;

        let doorbell = &self.config.doorbell;
        let device_id = if self.device_ids.doorbell.is_empty() {
            doorbell.device_id.trim()
        } else {
            self.device_ids.doorbell.as_str()
        };
        let body = RemoteCallRequest::new(
            device_id,
            &doorbell.device_name,
            &doorbell.door_name,
            &self.device_ids.viewers,
            Utc::now().timestamp(),
        );

        info!(
            request_id = %body.request_id,
            device_id = %body.device_id,
            viewers = body.notify_door_guards.len(),
            "triggering doorbell ring"
        );
        self.post(&remote_call_path(&body.device_id), &body).await?;
        Ok(body.request_id)
    }

    /// Decline a call on the controller.
    pub async fn dismiss_active_call(
        &mut self,
        device_id: &str,
        request_id: &str,
    ) -> Result<(), CoreError> {
        self.require_login()?;
        if request_id.is_empty() {
            return Err(CoreError::InvalidRequest {
                message: "no request id to dismiss".into(),
            });
        }

        let body = ReplyRemoteRequest::deny(device_id, request_id, &self.session.session().identity);
        info!(request_id, device_id, "dismissing doorbell call");
        self.post(&reply_remote_path(device_id), &body).await
    }

    /// Decline the tracked call and clear it. Returns `false` when there is
    /// nothing to dismiss.
    pub async fn dismiss_current(&mut self) -> Result<bool, CoreError> {
        let Some(call) = self
            .calls
            .active()
            .filter(|call| !call.device_id.is_empty())
            .cloned()
        else {
            debug!("no active call to dismiss");
            return Ok(false);
        };

        self.dismiss_active_call(&call.device_id, &call.request_id).await?;
        self.calls.clear();
        self.publish(DoorbellUpdate::Idle {
            reason: IdleReason::Dismissed,
        });
        Ok(true)
    }

    async fn post<T: Serialize + Sync>(&mut self, path: &str, body: &T) -> Result<(), CoreError> {
        let timeout = self.config.timing.login_timeout;
        let result = match tokio::time::timeout(timeout, self.session.post_json(path, body)).await {
            Ok(result) => result,
            Err(_) => Err(unidoor_api::Error::Timeout {
                timeout_secs: timeout.as_secs(),
            }),
        };

        match result {
            Ok(status) => {
                debug!(%status, path, "request accepted");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, path, "request failed");
                if e.is_auth_expired() {
                    self.session.invalidate(e.to_string());
                }
                Err(e.into())
            }
        }
    }

    fn require_login(&self) -> Result<(), CoreError> {
        if self.session.is_logged_in() {
            Ok(())
        } else {
            Err(CoreError::NotLoggedIn)
        }
    }

    // ── Topology ─────────────────────────────────────────────────────

    /// Fetch the reader list, retrying body and transport failures.
    pub async fn fetch_topology(&mut self) -> Result<Topology, CoreError> {
        self.require_login()?;

        let timeout = self.config.timing.topology_timeout;
        let mut last_error = String::new();

        for attempt in 1..=TOPOLOGY_ATTEMPTS {
            info!(attempt, max = TOPOLOGY_ATTEMPTS, "fetching device topology");
            let result = match tokio::time::timeout(timeout, self.session.fetch_topology_once()).await
            {
                Ok(result) => result,
                Err(_) => Err(unidoor_api::Error::Timeout {
                    timeout_secs: timeout.as_secs(),
                }),
            };

            match result {
                Ok(topology) => {
                    info!(
                        attempt,
                        readers = topology.readers.len(),
                        total_devices = topology.total_devices,
                        "topology fetched"
                    );
                    return Ok(topology);
                }
                Err(e) if e.is_auth_expired() => {
                    self.session.invalidate(e.to_string());
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "topology fetch failed");
                    last_error = e.to_string();
                    if attempt < TOPOLOGY_ATTEMPTS {
                        tokio::time::sleep(TOPOLOGY_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(CoreError::TopologyUnavailable {
            message: last_error,
            attempts: TOPOLOGY_ATTEMPTS,
            can_retry: true,
        })
    }
}
