// ── Device id bootstrap ──
//
// Configured doorbell and viewer ids may be written either as controller
// ids or as MAC addresses. MAC form is recognised by a `:` or `-`
// separator and reduced to the controller's lowercase hex spelling.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::DoorbellConfig;

/// Viewers notified by a triggered ring.
pub const MAX_VIEWERS: usize = 4;

/// Ids the controller knows this doorbell and its viewers by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIds {
    pub doorbell: String,
    pub viewers: Vec<String>,
}

/// Whether a configured id is written as a MAC address.
pub fn is_mac_form(id: &str) -> bool {
    id.contains([':', '-'])
}

/// Strip separators and lowercase a MAC address.
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Resolve one configured id into the controller's form.
pub fn resolve_device_id(configured: &str) -> String {
    let configured = configured.trim();
    if is_mac_form(configured) {
        normalize_mac(configured)
    } else {
        configured.to_owned()
    }
}

/// Resolve the doorbell id and up to [`MAX_VIEWERS`] non-empty viewer ids.
pub fn resolve(config: &DoorbellConfig) -> DeviceIds {
    let doorbell = resolve_device_id(&config.device_id);
    let viewers: Vec<String> = config
        .viewer_ids
        .iter()
        .map(|v| resolve_device_id(v))
        .filter(|v| !v.is_empty())
        .take(MAX_VIEWERS)
        .collect();

    if config.viewer_ids.iter().filter(|v| !v.trim().is_empty()).count() > MAX_VIEWERS {
        debug!(max = MAX_VIEWERS, "extra viewer ids ignored");
    }
    info!(doorbell = %doorbell, viewers = viewers.len(), "device ids resolved");

    DeviceIds { doorbell, viewers }
}
