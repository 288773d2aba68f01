//! `ring` and `dismiss`: one-shot remote call requests.

use serde::Serialize;

use unidoor_core::ControllerClient;

use crate::cli::{DismissArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
struct RingOutcome {
    request_id: String,
    device_id: String,
    viewers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DismissOutcome {
    request_id: String,
    device_id: String,
    response: &'static str,
}

pub async fn ring(mut client: ControllerClient, global: &GlobalOpts) -> Result<(), CliError> {
    util::connect(&mut client).await?;
    let request_id = client.trigger_ring().await?;

    let ids = client.device_ids();
    let outcome = RingOutcome {
        request_id,
        device_id: ids.doorbell.clone(),
        viewers: ids.viewers.clone(),
    };
    let out = output::render_single(
        &global.output,
        &outcome,
        |o| {
            format!(
                "Ringing {} viewer(s) from {}\nRequest id: {}",
                o.viewers.len(),
                o.device_id,
                o.request_id
            )
        },
        |o| o.request_id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn dismiss(
    mut client: ControllerClient,
    args: DismissArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::connect(&mut client).await?;

    let device_id = match args.device_id {
        Some(id) => unidoor_core::device_ids::resolve_device_id(&id),
        None => client.device_ids().doorbell.clone(),
    };
    client
        .dismiss_active_call(&device_id, &args.request_id)
        .await?;

    let outcome = DismissOutcome {
        request_id: args.request_id,
        device_id,
        response: "denied",
    };
    let out = output::render_single(
        &global.output,
        &outcome,
        |o| format!("Declined call {} on {}", o.request_id, o.device_id),
        |o| o.request_id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
