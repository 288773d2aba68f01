// ── Active call tracking ──
//
// At most one call is tracked. A new ring overwrites the current call,
// an end event clears it only when the request ids match, and a call
// older than the stale timeout is cleared by `tick`.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// A doorbell call that has rung and not yet ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCall {
    pub request_id: String,
    pub device_id: String,
    /// Viewer the controller routed the call to, if any.
    pub peer_id: Option<String>,
    pub started_at: Instant,
    /// Wall-clock time of the ring, for display.
    pub rang_at: DateTime<Utc>,
}

impl ActiveCall {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn summary(&self, now: Instant) -> CallSummary {
        CallSummary {
            request_id: self.request_id.clone(),
            device_id: self.device_id.clone(),
            peer_id: self.peer_id.clone(),
            age_secs: self.age(now).as_secs(),
        }
    }
}

/// Serializable view of an [`ActiveCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSummary {
    pub request_id: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    pub age_secs: u64,
}

/// Single-slot call state owned by the control loop.
#[derive(Debug, Clone)]
pub struct ActiveCallTracker {
    active: Option<ActiveCall>,
    stale_after: Duration,
}

impl ActiveCallTracker {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            active: None,
            stale_after,
        }
    }

    pub fn active(&self) -> Option<&ActiveCall> {
        self.active.as_ref()
    }

    /// Record a ring, replacing any call already tracked.
    pub fn on_ring_event(
        &mut self,
        request_id: &str,
        device_id: &str,
        peer_id: Option<&str>,
        now: Instant,
    ) -> &ActiveCall {
        if let Some(previous) = &self.active {
            debug!(previous = %previous.request_id, "ring replaces active call");
        }
        info!(request_id, device_id, "doorbell ringing");

        self.active.insert(ActiveCall {
            request_id: request_id.to_owned(),
            device_id: device_id.to_owned(),
            peer_id: peer_id.map(str::to_owned),
            started_at: now,
            rang_at: Utc::now(),
        })
    }

    /// Clear the call if `request_id` is the active one. Returns whether
    /// a call was cleared; mismatched ids are ignored.
    pub fn on_end_event(&mut self, request_id: &str) -> bool {
        match &self.active {
            Some(call) if call.request_id == request_id => {
                info!(request_id, "doorbell call ended");
                self.active = None;
                true
            }
            Some(call) => {
                debug!(request_id, active = %call.request_id, "end event for another call ignored");
                false
            }
            None => false,
        }
    }

    /// Clear a call older than the stale timeout. Returns whether a clear
    /// occurred.
    pub fn tick(&mut self, now: Instant) -> bool {
        let stale = self
            .active
            .as_ref()
            .is_some_and(|call| call.age(now) > self.stale_after);
        if stale {
            info!(timeout_secs = self.stale_after.as_secs(), "cleared stale doorbell call");
            self.active = None;
        }
        stale
    }

    /// Forget the active call unconditionally.
    pub fn clear(&mut self) -> Option<ActiveCall> {
        self.active.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const STALE: Duration = Duration::from_secs(300);

    #[test]
    fn mismatched_end_is_ignored_then_matching_end_clears() {
        let mut tracker = ActiveCallTracker::new(STALE);
        let now = Instant::now();

        tracker.on_ring_event("r1", "d1", None, now);
        assert!(!tracker.on_end_event("r2"));
        assert_eq!(tracker.active().map(|c| c.request_id.as_str()), Some("r1"));

        assert!(tracker.on_end_event("r1"));
        assert!(tracker.active().is_none());
        assert!(!tracker.on_end_event("r1"));
    }

    #[test]
    fn stale_call_is_cleared_by_tick() {
        let mut tracker = ActiveCallTracker::new(STALE);
        let start = Instant::now();
        tracker.on_ring_event("r1", "d1", Some("v1"), start);

        assert!(!tracker.tick(start + STALE));
        assert!(tracker.active().is_some());

        assert!(tracker.tick(start + STALE + Duration::from_secs(1)));
        assert!(tracker.active().is_none());
        assert!(!tracker.tick(start + STALE * 2));
    }

    #[test]
    fn new_ring_overwrites_active_call() {
        let mut tracker = ActiveCallTracker::new(STALE);
        let now = Instant::now();

        tracker.on_ring_event("r1", "d1", None, now);
        let call = tracker.on_ring_event("r2", "d1", Some("v9"), now + Duration::from_secs(3));
        assert_eq!(call.request_id, "r2");

        assert!(!tracker.on_end_event("r1"));
        assert_eq!(
            tracker.active().map(|c| c.summary(now + Duration::from_secs(10))),
            Some(CallSummary {
                request_id: "r2".into(),
                device_id: "d1".into(),
                peer_id: Some("v9".into()),
                age_secs: 7,
            })
        );
    }

    #[test]
    fn clear_returns_the_call() {
        let mut tracker = ActiveCallTracker::new(STALE);
        assert!(tracker.clear().is_none());
        tracker.on_ring_event("r1", "d1", None, Instant::now());
        assert_eq!(tracker.clear().map(|c| c.request_id), Some("r1".into()));
    }
}
