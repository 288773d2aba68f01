//! `run`: the long-lived bridge.
//!
//! Hands the client to the control loop, prints every doorbell state change
//! on stdout and shuts down on Ctrl-C.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use unidoor_core::{ControllerClient, DoorbellUpdate, Supervisor};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// One printed line per doorbell state change.
#[derive(Debug, Serialize)]
struct UpdateLine {
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rang_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<&DoorbellUpdate> for UpdateLine {
    fn from(update: &DoorbellUpdate) -> Self {
        match update {
            DoorbellUpdate::Ringing(call) => Self {
                state: "ringing",
                request_id: Some(call.request_id.clone()),
                device_id: Some(call.device_id.clone()),
                peer_id: call.peer_id.clone(),
                rang_at: Some(call.rang_at),
                reason: None,
            },
            DoorbellUpdate::Idle { reason } => Self {
                state: "idle",
                request_id: None,
                device_id: None,
                peer_id: None,
                rang_at: None,
                reason: Some(reason.to_string()),
            },
        }
    }
}

fn human(line: &UpdateLine) -> String {
    match (line.state, &line.request_id) {
        ("ringing", Some(request_id)) => format!(
            "{} request={request_id} device={}",
            output::highlight("RINGING"),
            line.device_id.as_deref().unwrap_or("-"),
        ),
        _ => format!("idle ({})", line.reason.as_deref().unwrap_or("-")),
    }
}

fn render(format: &OutputFormat, line: &UpdateLine) -> Result<String, CliError> {
    // Streaming output: one JSON document per line.
    let format = match format {
        OutputFormat::Json => &OutputFormat::JsonCompact,
        other => other,
    };
    output::render_single(format, line, human, |l| l.state.to_owned())
}

pub async fn handle(client: ControllerClient, global: &GlobalOpts) -> Result<(), CliError> {
    let (supervisor, handle) = Supervisor::new(client);
    let mut updates = handle.subscribe();
    let task = tokio::spawn(supervisor.run());

    tracing::info!("bridge running, press Ctrl-C to stop");

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                break signal.map_err(CliError::from);
            }
            update = updates.recv() => match update {
                Ok(update) => {
                    let out = render(&global.output, &UpdateLine::from(&update))?;
                    output::print_output(&out, global.quiet);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind; updates skipped");
                }
                Err(RecvError::Closed) => {
                    break Err(CliError::Internal("control loop stopped".into()));
                }
            },
        }
    };

    handle.shutdown();
    let client = task
        .await
        .map_err(|e| CliError::Internal(format!("control loop panicked: {e}")))?;
    tracing::info!(logged_in = client.is_logged_in(), "bridge stopped");
    result
}
