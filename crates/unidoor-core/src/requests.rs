// ── Typed request bodies for the remote-call endpoints ──

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;

/// Length of a generated call request id.
pub const REQUEST_ID_LEN: usize = 32;

/// Body of `POST .../device/{id}/remote_call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCallRequest {
    pub request_id: String,
    pub agora_channel: String,
    pub controller_id: String,
    pub device_id: String,
    pub device_name: String,
    pub door_name: String,
    pub floor_name: String,
    pub in_or_out: &'static str,
    pub mode: &'static str,
    pub create_time_uid: i64,
    pub create_time: i64,
    pub room_id: String,
    pub notify_door_guards: Vec<String>,
}

impl RemoteCallRequest {
    /// A fresh call from `device_id` to `viewers`, stamped `now` (Unix seconds).
    pub fn new(
        device_id: &str,
        device_name: &str,
        door_name: &str,
        viewers: &[String],
        now: i64,
    ) -> Self {
        let room = room_id();
        Self {
            request_id: request_id(),
            agora_channel: room.clone(),
            controller_id: device_id.to_owned(),
            device_id: device_id.to_owned(),
            device_name: device_name.to_owned(),
            door_name: door_name.to_owned(),
            floor_name: String::new(),
            in_or_out: "in",
            mode: "webrtc",
            create_time_uid: now,
            create_time: now,
            room_id: room,
            notify_door_guards: viewers.to_vec(),
        }
    }
}

/// Body of `POST .../device/{id}/reply_remote` declining a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyRemoteRequest {
    pub device_id: String,
    pub response: &'static str,
    pub request_id: String,
    pub user_id: String,
    pub user_name: String,
}

impl ReplyRemoteRequest {
    pub fn deny(device_id: &str, request_id: &str, user: &str) -> Self {
        Self {
            device_id: device_id.to_owned(),
            response: "denied",
            request_id: request_id.to_owned(),
            user_id: user.to_owned(),
            user_name: user.to_owned(),
        }
    }
}

/// Random alphanumeric call request id.
pub fn request_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LEN)
        .map(char::from)
        .collect()
}

/// Random call room id, `PR-` followed by an RFC 4122 v4 UUID.
pub fn room_id() -> String {
    format!("PR-{}", uuid::Uuid::new_v4())
}
