// Doorbell events carried on the notification stream.

use serde::Deserialize;
use serde_json::Value;

/// Event name of an incoming doorbell call.
pub const RING_EVENT: &str = "access.remote_view";
/// Event name sent when a call is answered, declined or cancelled.
pub const END_EVENT: &str = "access.remote_view.change";

/// A decoded doorbell notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoorbellEvent {
    Ring {
        request_id: String,
        device_id: String,
        /// Viewer the call was routed to, when the controller names one.
        peer_id: Option<String>,
    },
    End {
        request_id: String,
    },
}

// Fields are read leniently: a missing, null or non-string value reads as
// empty instead of failing the whole frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Value,
    #[serde(default)]
    data: Value,
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Whether a frame is the controller's periodic `"Hello"` heartbeat.
pub fn is_heartbeat(frame: &[u8]) -> bool {
    let trimmed = frame.trim_ascii();
    trimmed == b"\"Hello\"" || (trimmed.len() < 20 && trimmed.windows(5).any(|w| w == b"Hello"))
}

/// Decode one notification frame.
///
/// Heartbeats, non-object frames, unrelated events and events without a
/// request id decode to `Ok(None)`. Only malformed JSON is an error.
pub fn decode(frame: &[u8]) -> Result<Option<DoorbellEvent>, serde_json::Error> {
    if is_heartbeat(frame) || frame.trim_ascii_start().first() != Some(&b'{') {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_slice(frame)?;
    let data = &envelope.data;

    let event = match envelope.event.as_str().unwrap_or_default() {
        RING_EVENT if !text(data, "request_id").is_empty() => {
            let peer_id = text(data, "connected_uah_id");
            DoorbellEvent::Ring {
                request_id: text(data, "request_id").to_owned(),
                device_id: text(data, "device_id").to_owned(),
                peer_id: (!peer_id.is_empty()).then(|| peer_id.to_owned()),
            }
        }
        END_EVENT if !text(data, "remote_call_request_id").is_empty() => DoorbellEvent::End {
            request_id: text(data, "remote_call_request_id").to_owned(),
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}
