//! `login`: one-shot credential check.

use std::time::Instant;

use unidoor_core::{ControllerClient, ControllerStatus};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::util;

fn detail(status: &ControllerStatus, url: &str) -> String {
    let mut lines = vec![
        format!("Controller:  {url}"),
        format!("Logged in:   {}", status.logged_in),
        format!("Identity:    {}", status.identity),
    ];
    if let Some(err) = &status.last_error {
        lines.push(format!("Last error:  {err}"));
    }
    lines.join("\n")
}

pub async fn handle(mut client: ControllerClient, global: &GlobalOpts) -> Result<(), CliError> {
    util::connect(&mut client).await?;

    let url = client.config().url.to_string();
    let status = client.status(Instant::now());
    let out = output::render_single(
        &global.output,
        &status,
        |s| detail(s, &url),
        |s| s.identity.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
