#![allow(clippy::unwrap_used)]
// Topology fetch over a raw socket: chunked framing, truncation and
// malformed chunk sizes served by a scripted controller.

mod support;

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use support::{FakeController, Script, chunked, chunked_head};
use unidoor_api::Error;

fn device(id: &str, device_type: &str) -> Value {
    json!({
        "unique_id": id,
        "device_type": device_type,
        "name": format!("dev-{id}"),
        "mac": format!("00:11:22:33:44:{id}"),
        "ip": "10.0.0.9",
        "firmware": "v3.1.0",
        "extensions": [{"extension_name": "port_setting", "target_config": [{"config_key": "x"}]}],
    })
}

fn large_topology() -> (Value, Vec<&'static str>) {
    // Padding outside the whitelist so the document is well over a MiB.
    let padding = "p".repeat(64 * 1024);
    let mut floors = Vec::new();
    for f in 0..4 {
        floors.push(json!({
            "name": format!("F{f}"),
            "blob": padding,
            "doors": [
                {"name": "A", "device_groups": [[device(&format!("{f}a"), "UA-G3-Mini"), device(&format!("{f}h"), "UA-Hub")]]},
                {"name": "", "extra": {"blob": padding}, "device_groups": [[], [device(&format!("{f}b"), "UA-G2-Pro")]]},
            ],
        }));
    }
    let doc = json!({
        "code": "SUCCESS",
        "data": [
            {"floors": floors, "junk": vec![padding.clone(); 8]},
            {"floors": [{"name": "Annex", "doors": [{"name": "Gate", "device_groups": [[device("zz", "UA-Reader-Lite")]]}]}]},
        ],
    });
    let expected = vec!["0a", "0b", "1a", "1b", "2a", "2b", "3a", "3b", "zz"];
    (doc, expected)
}

async fn logged_in(controller: &FakeController) -> unidoor_api::ControllerSession {
    let mut session = controller.session();
    session.login().await.unwrap();
    session
}

#[tokio::test]
async fn test_chunked_topology_yields_readers_in_document_order() {
    let (doc, expected) = large_topology();
    let body = doc.to_string();
    assert!(body.len() > 1024 * 1024);

    let mut response = chunked_head();
    response.extend(chunked(body.as_bytes(), 4096));
    let controller = FakeController::start(Script {
        topology_response: response,
        ..Script::default()
    })
    .await;
    let mut session = logged_in(&controller).await;

    let topology = session.fetch_topology_once().await.unwrap();

    let ids: Vec<_> = topology.readers.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, expected);
    assert_eq!(topology.total_devices, 13);
    assert_eq!(topology.readers[0].location, "F0 / A");
    assert_eq!(topology.readers[1].location, "F0");
    assert_eq!(topology.readers[8].location, "Annex / Gate");
}

#[tokio::test]
async fn test_malformed_chunk_size_is_framing_error() {
    let mut response = chunked_head();
    response.extend_from_slice(b"5\r\n{\"dat\r\nnot-hex\r\nrest\r\n0\r\n\r\n");
    let controller = FakeController::start(Script {
        topology_response: response,
        ..Script::default()
    })
    .await;
    let mut session = logged_in(&controller).await;

    let result = session.fetch_topology_once().await;
    assert!(matches!(result, Err(Error::ChunkFraming)), "got: {result:?}");
}

#[tokio::test]
async fn test_closed_mid_body_is_incomplete() {
    let mut response = chunked_head();
    response.extend_from_slice(b"40\r\n{\"data\":[{\"floors\":[");
    let controller = FakeController::start(Script {
        topology_response: response,
        ..Script::default()
    })
    .await;
    let mut session = logged_in(&controller).await;

    let result = session.fetch_topology_once().await;
    assert!(matches!(result, Err(Error::IncompleteTopology)), "got: {result:?}");
}

#[tokio::test]
async fn test_stalled_body_ends_within_bounded_wait() {
    let mut response = chunked_head();
    response.extend_from_slice(b"40\r\n{\"data\":[{\"floors\":[");
    let controller = FakeController::start(Script {
        topology_response: response,
        hold_topology_open: true,
        ..Script::default()
    })
    .await;
    let mut session = logged_in(&controller).await;

    let started = Instant::now();
    let result = session.fetch_topology_once().await;

    assert!(matches!(result, Err(Error::IncompleteTopology)), "got: {result:?}");
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn test_empty_chunked_body_is_incomplete() {
    let mut response = chunked_head();
    response.extend(chunked(b"", 1));
    let controller = FakeController::start(Script {
        topology_response: response,
        ..Script::default()
    })
    .await;
    let mut session = logged_in(&controller).await;

    let result = session.fetch_topology_once().await;
    assert!(matches!(result, Err(Error::IncompleteTopology)), "got: {result:?}");
}
