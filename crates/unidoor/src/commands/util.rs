//! Shared helpers for command handlers.

use unidoor_core::ControllerClient;

use crate::error::CliError;

/// Log in, resolve device ids, and report the session on stderr.
pub async fn connect(client: &mut ControllerClient) -> Result<(), CliError> {
    tracing::debug!(url = %client.config().url, "logging in");
    client.login().await?;
    client.bootstrap_device_ids();
    tracing::info!(identity = %client.session().session().identity, "logged in");
    Ok(())
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(prompt_err)
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}
