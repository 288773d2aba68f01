//! Config subcommand handlers.

use std::path::PathBuf;

use dialoguer::{Input, Select};

use unidoor_config::{Config, ConfigError};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util::{confirm, prompt_err};

// ── Helpers ─────────────────────────────────────────────────────────

fn save(cfg: &Config, global: &GlobalOpts) -> Result<PathBuf, CliError> {
    let path = config::config_path(global);
    unidoor_config::save_config_to(cfg, &path)?;
    Ok(path)
}

fn invalid(field: &str, reason: impl Into<String>) -> CliError {
    CliError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, CliError> {
    value
        .parse()
        .map_err(|_| invalid(field, "must be 'true' or 'false'"))
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, CliError> {
    value
        .parse()
        .map_err(|_| invalid(field, "must be a non-negative number"))
}

/// Comma-separated list, blanks dropped.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Apply `key = value` to the config. Keys are `section.field`.
fn set_key(cfg: &mut Config, key: &str, value: &str) -> Result<(), CliError> {
    let optional = |v: &str| (!v.is_empty()).then(|| v.to_owned());

    match key {
        "controller.host" => cfg.controller.host = value.to_owned(),
        "controller.username" => cfg.controller.username = value.to_owned(),
        "controller.password" => cfg.controller.password = optional(value),
        "controller.password_env" => cfg.controller.password_env = optional(value),
        "controller.ca_cert" => cfg.controller.ca_cert = optional(value).map(PathBuf::from),
        "controller.insecure" => cfg.controller.insecure = Some(parse_bool(key, value)?),
        "doorbell.device_id" => cfg.doorbell.device_id = value.to_owned(),
        "doorbell.device_name" => cfg.doorbell.device_name = value.to_owned(),
        "doorbell.door_name" => cfg.doorbell.door_name = value.to_owned(),
        "doorbell.viewer_ids" => cfg.doorbell.viewer_ids = parse_list(value),
        "timing.tick_ms" => cfg.timing.tick_ms = parse_number(key, value)?,
        "timing.login_retry_secs" => cfg.timing.login_retry_secs = parse_number(key, value)?,
        "timing.stream_retry_secs" => cfg.timing.stream_retry_secs = parse_number(key, value)?,
        "timing.max_stream_failures" => {
            cfg.timing.max_stream_failures = parse_number(key, value)?;
        }
        "timing.stale_call_secs" => cfg.timing.stale_call_secs = parse_number(key, value)?,
        "timing.status_report_secs" => cfg.timing.status_report_secs = parse_number(key, value)?,
        "timing.login_timeout_secs" => cfg.timing.login_timeout_secs = parse_number(key, value)?,
        "timing.topology_timeout_secs" => {
            cfg.timing.topology_timeout_secs = parse_number(key, value)?;
        }
        other => {
            return Err(invalid(
                other,
                format!(
                    "unknown config key '{other}'. Valid sections: controller.*, \
                     doorbell.*, timing.* (see `unidoor config show`)"
                ),
            ));
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),

        ConfigCommand::Show => {
            let cfg = config::redacted(&config::load(global)?);
            let toml_str = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
            let out = output::render_single(
                &global.output,
                &cfg,
                |_| toml_str.trim_end().to_owned(),
                |c| c.controller.host.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::config_path(global).display());
            Ok(())
        }

        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load(global)?;
            set_key(&mut cfg, &key, &value)?;
            let path = save(&cfg, global)?;
            if !global.quiet {
                eprintln!("{} Set {key} in {}", output::check(), path.display());
            }
            Ok(())
        }

        ConfigCommand::SetPassword => {
            let cfg = config::load_with_overrides(global)?;
            let host = cfg.controller.host.trim();
            if host.is_empty() {
                return Err(invalid("controller.host", "must not be empty"));
            }

            let password =
                rpassword::prompt_password(format!("Password for {host}: ")).map_err(prompt_err)?;
            if password.is_empty() {
                return Err(invalid("password", "value cannot be empty"));
            }

            unidoor_config::store_password(host, &password)?;
            if !global.quiet {
                eprintln!("{} Password stored in system keyring for '{host}'", output::check());
            }
            Ok(())
        }
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_path(global);
    eprintln!("unidoor configuration wizard");
    eprintln!("   Config path: {}\n", path.display());

    if path.exists() && !confirm("A config file already exists. Overwrite it?", global.yes)? {
        eprintln!("Aborted.");
        return Ok(());
    }

    let mut cfg = Config::default();

    // 1. Controller
    cfg.controller.host = Input::<String>::new()
        .with_prompt("Controller host or URL")
        .default("192.168.1.1".into())
        .interact_text()
        .map_err(prompt_err)?;
    cfg.controller.username = Input::<String>::new()
        .with_prompt("Username")
        .interact_text()
        .map_err(prompt_err)?;

    // 2. Password
    let password = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
    if password.is_empty() {
        return Err(invalid("password", "value cannot be empty"));
    }
    let store_choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
        "Read from UNIDOOR_PASSWORD at runtime",
    ];
    match Select::new()
        .with_prompt("Where to store the password?")
        .items(store_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?
    {
        0 => {
            unidoor_config::store_password(&cfg.controller.host, &password)?;
            eprintln!("   {} Password stored in system keyring", output::check());
        }
        1 => cfg.controller.password = Some(password),
        _ => {}
    }

    // 3. TLS
    let tls_choices = &[
        "Accept the console's self-signed certificate",
        "Verify with system CA roots",
        "Pin a certificate file",
    ];
    match Select::new()
        .with_prompt("TLS verification")
        .items(tls_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?
    {
        0 => cfg.controller.insecure = Some(true),
        1 => cfg.controller.insecure = Some(false),
        _ => {
            let cert = Input::<String>::new()
                .with_prompt("Certificate path (PEM)")
                .interact_text()
                .map_err(prompt_err)?;
            cfg.controller.insecure = Some(false);
            cfg.controller.ca_cert = Some(cert.into());
        }
    }

    // 4. Doorbell identity
    cfg.doorbell.device_id = Input::<String>::new()
        .with_prompt("Doorbell device id or MAC")
        .interact_text()
        .map_err(prompt_err)?;
    cfg.doorbell.device_name = Input::<String>::new()
        .with_prompt("Doorbell name")
        .default("Doorbell".into())
        .interact_text()
        .map_err(prompt_err)?;
    cfg.doorbell.door_name = Input::<String>::new()
        .with_prompt("Door name")
        .default("Front Door".into())
        .interact_text()
        .map_err(prompt_err)?;
    let viewers = Input::<String>::new()
        .with_prompt("Viewer ids or MACs (comma-separated, up to 4)")
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;
    cfg.doorbell.viewer_ids = parse_list(&viewers);

    cfg.validate()?;
    let path = save(&cfg, global)?;

    eprintln!("\n{} Configuration written to {}", output::check(), path.display());
    eprintln!("\n  Test it: unidoor login");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_known_keys() {
        let mut cfg = Config::default();
        set_key(&mut cfg, "controller.host", "10.0.0.1").unwrap();
        set_key(&mut cfg, "controller.insecure", "false").unwrap();
        set_key(&mut cfg, "doorbell.viewer_ids", "aa:bb, ,viewer2").unwrap();
        set_key(&mut cfg, "timing.stale_call_secs", "120").unwrap();
        set_key(&mut cfg, "controller.password_env", "").unwrap();

        assert_eq!(cfg.controller.host, "10.0.0.1");
        assert_eq!(cfg.controller.insecure, Some(false));
        assert_eq!(cfg.doorbell.viewer_ids, ["aa:bb", "viewer2"]);
        assert_eq!(cfg.timing.stale_call_secs, 120);
        assert_eq!(cfg.controller.password_env, None);
    }

    #[test]
    fn set_rejects_bad_values() {
        let mut cfg = Config::default();
        assert!(matches!(
            set_key(&mut cfg, "controller.insecure", "maybe"),
            Err(CliError::Validation { .. })
        ));
        assert!(matches!(
            set_key(&mut cfg, "timing.tick_ms", "-5"),
            Err(CliError::Validation { .. })
        ));
        assert!(matches!(
            set_key(&mut cfg, "profile", "x"),
            Err(CliError::Validation { field, .. }) if field == "profile"
        ));
    }
}
