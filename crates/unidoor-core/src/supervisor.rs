// ── Control loop ──
//
// One task owns the `ControllerClient` and drives it on a fixed tick:
// login retry, stream supervision, notification drain, observer
// requests, stale-call cleanup and the periodic status line. Blocking
// calls stall the loop; the mailbox is drained again right after each.

use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use unidoor_api::{SuperviseAction, Topology};

use crate::controller::ControllerClient;
use crate::error::CoreError;
use crate::status::{ControllerStatus, DoorbellUpdate};

const REQUEST_CHANNEL_SIZE: usize = 16;

type Reply<T> = oneshot::Sender<Result<T, CoreError>>;

/// Work submitted to the control loop by observers.
#[derive(Debug)]
pub enum Request {
    TriggerRing {
        reply: Reply<String>,
    },
    Dismiss {
        device_id: String,
        request_id: String,
        reply: Reply<()>,
    },
    DismissCurrent {
        reply: Reply<bool>,
    },
    FetchTopology {
        reply: Reply<Topology>,
    },
}

// ── Handle ───────────────────────────────────────────────────────────

/// Cloneable handle for MQTT, web and GPIO front-ends.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<ControllerStatus>,
    updates: broadcast::Sender<DoorbellUpdate>,
    cancel: CancellationToken,
}

impl SupervisorHandle {
    pub async fn trigger_ring(&self) -> Result<String, CoreError> {
        self.call(|reply| Request::TriggerRing { reply }).await
    }

    pub async fn dismiss(&self, device_id: &str, request_id: &str) -> Result<(), CoreError> {
        let device_id = device_id.to_owned();
        let request_id = request_id.to_owned();
        self.call(|reply| Request::Dismiss {
            device_id,
            request_id,
            reply,
        })
        .await
    }

    pub async fn dismiss_current(&self) -> Result<bool, CoreError> {
        self.call(|reply| Request::DismissCurrent { reply }).await
    }

    pub async fn fetch_topology(&self) -> Result<Topology, CoreError> {
        self.call(|reply| Request::FetchTopology { reply }).await
    }

    /// Latest published status.
    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DoorbellUpdate> {
        self.updates.subscribe()
    }

    /// Stop the control loop after its current step.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }
}

fn stopped() -> CoreError {
    CoreError::Internal("control loop is not running".into())
}

// ── Supervisor ───────────────────────────────────────────────────────

/// Owner of the control loop.
#[derive(Debug)]
pub struct Supervisor {
    client: ControllerClient,
    requests: mpsc::Receiver<Request>,
    status: watch::Sender<ControllerStatus>,
    cancel: CancellationToken,
    last_login_attempt: Option<Instant>,
    last_status_report: Instant,
}

impl Supervisor {
    pub fn new(client: ControllerClient) -> (Self, SupervisorHandle) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (status_tx, status_rx) = watch::channel(client.status(Instant::now()));
        let cancel = CancellationToken::new();

        let handle = SupervisorHandle {
            requests: request_tx,
            status: status_rx,
            updates: client.update_sender(),
            cancel: cancel.clone(),
        };
        let supervisor = Self {
            client,
            requests: request_rx,
            status: status_tx,
            cancel,
            last_login_attempt: None,
            last_status_report: Instant::now(),
        };
        (supervisor, handle)
    }

    /// Run until [`SupervisorHandle::shutdown`] is called. Returns the
    /// client with its stream closed.
    pub async fn run(mut self) -> ControllerClient {
        let mut interval = tokio::time::interval(self.client.config().timing.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(url = %self.client.config().url, "control loop started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => self.step(Instant::now()).await,
            }
        }

        self.client.disconnect();
        self.publish_status(Instant::now());
        info!("control loop stopped");
        self.client
    }

    /// One control-loop iteration at time `now`.
    pub async fn step(&mut self, now: Instant) {
        let timing = self.client.config().timing;

        if !self.client.is_logged_in() && self.login_due(now) {
            self.last_login_attempt = Some(now);
            match self.client.establish().await {
                Ok(()) => info!("controller session established"),
                Err(e) => warn!(
                    error = %e,
                    retry_secs = timing.login_retry.as_secs(),
                    "login failed"
                ),
            }
            self.client.drain_events(Instant::now());
        }

        if let SuperviseAction::ForceRelogin { .. } = self.client.supervise_stream(now) {
            // Log in again on the next step.
            self.last_login_attempt = None;
        }

        self.client.drain_events(now);

        while let Ok(request) = self.requests.try_recv() {
            self.handle(request).await;
            self.client.drain_events(Instant::now());
        }

        self.client.tick(now);

        if now.saturating_duration_since(self.last_status_report) > timing.status_report {
            self.last_status_report = now;
            self.report(now);
        }
        self.publish_status(now);
    }

    fn login_due(&self, now: Instant) -> bool {
        let retry = self.client.config().timing.login_retry;
        self.last_login_attempt
            .is_none_or(|t| now.saturating_duration_since(t) >= retry)
    }

    async fn handle(&mut self, request: Request) {
        debug!(?request, "handling request");
        // A dropped reply receiver means the caller stopped waiting.
        match request {
            Request::TriggerRing { reply } => {
                let _ = reply.send(self.client.trigger_ring().await);
            }
            Request::Dismiss {
                device_id,
                request_id,
                reply,
            } => {
                let result = self.client.dismiss_active_call(&device_id, &request_id).await;
                let _ = reply.send(result);
            }
            Request::DismissCurrent { reply } => {
                let _ = reply.send(self.client.dismiss_current().await);
            }
            Request::FetchTopology { reply } => {
                let _ = reply.send(self.client.fetch_topology().await);
            }
        }
    }

    fn report(&self, now: Instant) {
        let status = self.client.status(now);
        info!(
            logged_in = status.logged_in,
            stream = %status.stream_state,
            consecutive_failures = status.consecutive_failures,
            total_reconnects = status.total_reconnects,
            dropped_frames = status.dropped_frames,
            active_call = status.active_call.as_ref().map(|c| c.request_id.as_str()),
            last_error = status.last_error.as_deref(),
            "status"
        );
    }

    fn publish_status(&self, now: Instant) {
        let next = self.client.status(now);
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
