#![allow(clippy::unwrap_used)]
// Control-loop tests: login retry cadence and request routing.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use unidoor_api::session::{LOGIN_PATH, remote_call_path};
use unidoor_core::{ControllerClient, ControllerConfig, CoreError, Supervisor, TimingConfig};

fn fast_config(server: &MockServer, login_retry: Duration) -> ControllerConfig {
    let password = SecretString::from("pw".to_owned());
    let mut config = ControllerConfig::new(server.uri().parse().unwrap(), "admin", password);
    config.doorbell.device_id = "dev1".into();
    config.timing = TimingConfig {
        tick: Duration::from_millis(5),
        login_retry,
        login_timeout: Duration::from_secs(2),
        ..TimingConfig::default()
    };
    config
}

async fn mount_csrf(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("X-Csrf-Token", "csrf"))
        .mount(server)
        .await;
}

async fn login_posts(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == LOGIN_PATH)
        .count()
}

#[tokio::test]
async fn test_logs_in_and_serves_ring_requests() {
    let server = MockServer::start().await;
    mount_csrf(&server).await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).append_header("Set-Cookie", "TOKEN=abc; path=/"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(remote_call_path("dev1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "SUCCESS"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ControllerClient::new(fast_config(&server, Duration::from_secs(30))).unwrap();
    let (supervisor, handle) = Supervisor::new(client);
    let task = tokio::spawn(supervisor.run());

    let mut status = handle.watch_status();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.logged_in))
        .await
        .unwrap()
        .unwrap();

    let request_id = handle.trigger_ring().await.unwrap();
    assert_eq!(request_id.len(), 32);

    // No active call to dismiss.
    assert!(!handle.dismiss_current().await.unwrap());

    handle.shutdown();
    let client = task.await.unwrap();
    assert!(client.is_logged_in());
}

#[tokio::test]
async fn test_failed_login_is_retried_on_schedule() {
    let server = MockServer::start().await;
    mount_csrf(&server).await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = ControllerClient::new(fast_config(&server, Duration::from_millis(100))).unwrap();
    let (supervisor, handle) = Supervisor::new(client);
    let task = tokio::spawn(supervisor.run());

    tokio::time::sleep(Duration::from_millis(450)).await;
    let attempts = login_posts(&server).await;
    assert!((2..=6).contains(&attempts), "login attempts: {attempts}");

    let status = handle.status();
    assert!(!status.logged_in);
    assert!(status.last_error.is_some());

    // Requests are answered while logged out.
    let result = handle.trigger_ring().await;
    assert!(matches!(result, Err(CoreError::NotLoggedIn)), "got: {result:?}");

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_handle_after_shutdown_reports_stopped() {
    let server = MockServer::start().await;
    let client = ControllerClient::new(fast_config(&server, Duration::from_secs(30))).unwrap();
    let (supervisor, handle) = Supervisor::new(client);
    let task = tokio::spawn(supervisor.run());

    handle.shutdown();
    task.await.unwrap();

    let result = handle.fetch_topology().await;
    assert!(matches!(result, Err(CoreError::Internal(_))), "got: {result:?}");
}
