//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod calls;
pub mod config_cmd;
pub mod login;
pub mod run;
pub mod topology;
pub mod util;

use unidoor_core::ControllerClient;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a controller-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    client: ControllerClient,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Run => run::handle(client, global).await,
        Command::Login => login::handle(client, global).await,
        Command::Topology => topology::handle(client, global).await,
        Command::Ring => calls::ring(client, global).await,
        Command::Dismiss(args) => calls::dismiss(client, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command does not use a controller connection".into(),
        )),
    }
}
