//! Integration tests for the `unidoor` CLI binary.
//!
//! Argument parsing, help output, completions, config handling and error
//! exit codes, plus a few commands driven against a wiremock controller.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `unidoor` binary with env isolation.
///
/// Clears all `UNIDOOR_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn unidoor_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("unidoor");
    cmd.env("HOME", "/tmp/unidoor-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/unidoor-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("UNIDOOR_CONFIG")
        .env_remove("UNIDOOR_HOST")
        .env_remove("UNIDOOR_USERNAME")
        .env_remove("UNIDOOR_OUTPUT")
        .env_remove("UNIDOOR_INSECURE")
        .env_remove("UNIDOOR_LOG_FORMAT")
        .env_remove("UNIDOOR_PASSWORD");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn write_config(dir: &Path, host: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[controller]
host = "{host}"
username = "admin"
password = "file-secret"

[doorbell]
device_id = "AA:BB:CC:00:11:22"
device_name = "Front Bell"
door_name = "Front Door"
viewer_ids = ["viewer1"]
"#
        ),
    )
    .unwrap();
    path
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("X-Csrf-Token", "csrf"))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_partial_json(json!({"username": "admin", "password": "env-secret"})))
        .respond_with(ResponseTemplate::new(200).append_header("Set-Cookie", "TOKEN=abc; path=/"))
        .mount(server)
        .await;
}

/// Run the binary off the async runtime so wiremock keeps serving.
async fn run_blocking(mut cmd: assert_cmd::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = unidoor_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    unidoor_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("doorbell")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("topology"))
            .and(predicate::str::contains("dismiss")),
    );
}

#[test]
fn test_version_flag() {
    unidoor_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("unidoor"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_zsh() {
    unidoor_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_completions_bash() {
    unidoor_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = unidoor_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("foobar"), "Expected error naming the subcommand:\n{text}");
}

#[test]
fn test_ring_without_config() {
    let dir = tempfile::tempdir().unwrap();
    let output = unidoor_cmd()
        .args(["--config", dir.path().join("missing.toml").to_str().unwrap(), "ring"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(text.contains("config init"), "Expected setup hint:\n{text}");
}

#[test]
fn test_dismiss_requires_request_id() {
    let output = unidoor_cmd().arg("dismiss").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--request-id"));
}

#[test]
fn test_invalid_timing_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "10.0.0.1");
    std::fs::write(
        &path,
        std::fs::read_to_string(&path).unwrap() + "\n[timing]\nstale_call_secs = 0\n",
    )
    .unwrap();

    let output = unidoor_cmd()
        .args(["--config", path.to_str().unwrap(), "login"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("stale_call_secs"));
}

// ── Config commands ─────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    unidoor_cmd()
        .args(["--config", "/tmp/unidoor-test/custom.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/unidoor-test/custom.toml"));
}

#[test]
fn test_config_show_redacts_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "10.0.0.1");

    let output = unidoor_cmd()
        .args(["--config", path.to_str().unwrap(), "-o", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["controller"]["host"], "10.0.0.1");
    assert_eq!(shown["controller"]["password"], "********");
    assert_eq!(shown["doorbell"]["viewer_ids"], json!(["viewer1"]));
}

#[test]
fn test_config_set_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "10.0.0.1");

    unidoor_cmd()
        .args([
            "--config",
            path.to_str().unwrap(),
            "config",
            "set",
            "doorbell.viewer_ids",
            "viewer1,viewer2",
        ])
        .assert()
        .success();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("viewer2"), "config not updated:\n{written}");
    assert!(written.contains("Front Bell"), "existing keys lost:\n{written}");
}

#[test]
fn test_config_set_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "10.0.0.1");

    let output = unidoor_cmd()
        .args(["--config", path.to_str().unwrap(), "config", "set", "site", "x"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Against a mock controller ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_topology_lists_readers() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/proxy/access/api/v2/devices/topology4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"floors": [{"name": "Ground", "doors": [{"name": "Front",
                "device_groups": [[
                    {"unique_id": "r1", "device_type": "UA-G2-Pro", "name": "Front Reader", "mac": "aabbcc001122"},
                    {"unique_id": "h1", "device_type": "UAH", "name": "Hub", "mac": "m2"}
                ]]}]}]}]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server.uri());
    let mut cmd = unidoor_cmd();
    cmd.env("UNIDOOR_PASSWORD", "env-secret")
        .args(["--config", config.to_str().unwrap(), "-o", "plain", "topology"]);

    let output = run_blocking(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "r1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ring_posts_remote_call() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/proxy/access/api/v2/device/aabbcc001122/remote_call"))
        .and(body_partial_json(json!({
            "device_name": "Front Bell",
            "notify_door_guards": ["viewer1"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "SUCCESS"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server.uri());
    let mut cmd = unidoor_cmd();
    cmd.env("UNIDOOR_PASSWORD", "env-secret")
        .args(["--config", config.to_str().unwrap(), "-o", "json-compact", "ring"]);

    let output = run_blocking(cmd).await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["device_id"], "aabbcc001122");
    assert_eq!(outcome["request_id"].as_str().unwrap().len(), 32);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_dismiss_exit_code() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/proxy/access/api/v2/device/other01/reply_remote"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server.uri());
    let mut cmd = unidoor_cmd();
    cmd.env("UNIDOOR_PASSWORD", "env-secret").args([
        "--config",
        config.to_str().unwrap(),
        "dismiss",
        "--request-id",
        "r1",
        "--device-id",
        "other01",
    ]);

    let output = run_blocking(cmd).await;
    assert_eq!(output.status.code(), Some(5), "{}", combined_output(&output));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_password_exit_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &server.uri());
    let mut cmd = unidoor_cmd();
    cmd.env("UNIDOOR_PASSWORD", "wrong")
        .args(["--config", config.to_str().unwrap(), "login"]);

    let output = run_blocking(cmd).await;
    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
}
