//! CLI-side config resolution: the config file plus `--controller`,
//! `--username` and `--insecure` overrides, translated to
//! `unidoor_core::ControllerConfig`.

use std::path::PathBuf;

use unidoor_config::Config;
use unidoor_core::ControllerConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` / `UNIDOOR_CONFIG`, else the platform path.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(unidoor_config::config_path)
}

/// Load the config file (defaults if it does not exist).
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(unidoor_config::load_config_from(&config_path(global))?)
}

/// Load the config and apply command-line overrides.
///
/// A missing file is only an error when `--controller` does not name a
/// controller either.
pub fn load_with_overrides(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_path(global);
    if !path.exists() && global.controller.is_none() {
        return Err(CliError::NoConfig {
            path: path.display().to_string(),
        });
    }

    let mut cfg = unidoor_config::load_config_from(&path)?;
    apply_overrides(&mut cfg, global);
    Ok(cfg)
}

fn apply_overrides(cfg: &mut Config, global: &GlobalOpts) {
    if let Some(host) = &global.controller {
        cfg.controller.host.clone_from(host);
    }
    if let Some(username) = &global.username {
        cfg.controller.username.clone_from(username);
    }
    if global.insecure {
        cfg.controller.insecure = Some(true);
    }
}

/// Build the `ControllerConfig` for controller-bound commands.
pub fn controller_config(global: &GlobalOpts) -> Result<ControllerConfig, CliError> {
    let cfg = load_with_overrides(global)?;
    Ok(cfg.to_controller_config()?)
}

/// Copy of `cfg` safe to print.
pub fn redacted(cfg: &Config) -> Config {
    let mut shown = cfg.clone();
    if shown.controller.password.is_some() {
        shown.controller.password = Some("********".into());
    }
    shown
}
