// ── Observable doorbell state ──

use serde::Serialize;
use strum::Display;

use unidoor_api::StreamState;

use crate::call::{ActiveCall, CallSummary};

/// Why the doorbell went back to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IdleReason {
    /// The controller reported the call answered, declined or cancelled.
    Ended,
    /// Nobody ended the call before the stale timeout.
    Stale,
    /// This bridge declined the call.
    Dismissed,
}

/// Doorbell state changes pushed to observers (MQTT, web UI, GPIO).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoorbellUpdate {
    Ringing(ActiveCall),
    Idle { reason: IdleReason },
}

impl DoorbellUpdate {
    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ringing(_))
    }
}

/// Point-in-time snapshot of the bridge for status surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub logged_in: bool,
    pub identity: String,
    pub last_error: Option<String>,
    pub stream_state: StreamState,
    pub consecutive_failures: u32,
    pub total_reconnects: u64,
    pub dropped_frames: u64,
    pub active_call: Option<CallSummary>,
}
