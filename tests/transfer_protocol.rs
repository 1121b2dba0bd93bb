//! Wire-level behavior of the transfer_file RPC.
//!
//! Covers:
//! - A fresh asset resolves to the golden response with its SHA-256 digest.
//! - An empty payload falls back to the default type/version.
//! - A stale client digest yields `content: null`.
//! - Validation, identity, unknown-rpc, and missing-asset failures map to
//!   their stable codes and messages.

mod common;

use tempfile::TempDir;

fn start_server(root: &std::path::Path) -> (std::process::Child, String) {
    let addr = common::free_addr();
    let mut server = common::spawn_server(root, &addr);
    common::wait_for_server(&addr, &mut server);
    (server, addr)
}

#[test]
fn fresh_asset_resolves_with_content_and_digest() {
    let tmp = TempDir::new().unwrap();
    common::write_asset(tmp.path(), "core", "1.0.0", common::FIXTURE.as_bytes());
    let (mut server, addr) = start_server(tmp.path());

    let response = common::rpc_request(
        &addr,
        r#"{"rpc":"transfer_file","payload":"{\"type\":\"core\",\"version\":\"1.0.0\"}"}"#,
    );
    let parsed: serde_json::Value = serde_json::from_str(&response).expect("valid envelope");

    assert_eq!(parsed["ok"], true, "envelope: {response}");
    assert_eq!(
        parsed["payload"].as_str().expect("payload string"),
        common::GOLDEN_RESPONSE
    );

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn empty_payload_uses_default_identifiers() {
    let tmp = TempDir::new().unwrap();
    common::write_asset(tmp.path(), "core", "1.0.0", common::FIXTURE.as_bytes());
    let (mut server, addr) = start_server(tmp.path());

    let response =
        common::rpc_request(&addr, r#"{"rpc":"transfer_file","payload":"{}"}"#);
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();

    assert_eq!(parsed["ok"], true, "envelope: {response}");
    assert_eq!(parsed["payload"].as_str().unwrap(), common::GOLDEN_RESPONSE);

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn stale_digest_gets_null_content() {
    let tmp = TempDir::new().unwrap();
    common::write_asset(tmp.path(), "core", "1.0.0", common::FIXTURE.as_bytes());
    let (mut server, addr) = start_server(tmp.path());

    let response = common::rpc_request(
        &addr,
        r#"{"rpc":"transfer_file","payload":"{\"type\":\"core\",\"version\":\"1.0.0\",\"hash\":\"invalidhash\"}"}"#,
    );
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(parsed["ok"], true, "envelope: {response}");

    let payload: serde_json::Value =
        serde_json::from_str(parsed["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload["hash"], common::FIXTURE_HASH);
    assert_eq!(payload["content"], serde_json::Value::Null);

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn matching_digest_still_receives_content() {
    let tmp = TempDir::new().unwrap();
    common::write_asset(tmp.path(), "core", "1.0.0", common::FIXTURE.as_bytes());
    let (mut server, addr) = start_server(tmp.path());

    let line = format!(
        r#"{{"rpc":"transfer_file","payload":"{{\"type\":\"core\",\"version\":\"1.0.0\",\"hash\":\"{}\"}}"}}"#,
        common::FIXTURE_HASH
    );
    let response = common::rpc_request(&addr, &line);
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();

    assert_eq!(parsed["ok"], true, "envelope: {response}");
    assert_eq!(parsed["payload"].as_str().unwrap(), common::GOLDEN_RESPONSE);

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn path_separators_in_identifiers_are_rejected_together() {
    let tmp = TempDir::new().unwrap();
    let (mut server, addr) = start_server(tmp.path());

    let response = common::rpc_request(
        &addr,
        r#"{"rpc":"transfer_file","payload":"{\"type\":\"invalid/type\",\"version\":\"invalid_version/\"}"}"#,
    );
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();

    assert_eq!(parsed["ok"], false, "envelope: {response}");
    assert_eq!(parsed["code"], 3);
    let message = parsed["message"].as_str().unwrap();
    assert!(message.contains("invalid type field"), "message: {message}");
    assert!(
        message.contains("invalid version field"),
        "message: {message}"
    );

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn forwarded_user_identity_is_rejected() {
    let tmp = TempDir::new().unwrap();
    common::write_asset(tmp.path(), "core", "1.0.0", common::FIXTURE.as_bytes());
    let (mut server, addr) = start_server(tmp.path());

    let response = common::rpc_request(
        &addr,
        r#"{"rpc":"transfer_file","payload":"{\"type\":\"core\",\"version\":\"1.0.0\"}","user_id":"7e0064a2-6b34-4d19-a176-9bbbdd1e3ea1"}"#,
    );
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();

    assert_eq!(parsed["ok"], false, "envelope: {response}");
    assert_eq!(parsed["code"], 3);
    assert_eq!(parsed["message"], "user ID in context not allowed");

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn missing_asset_reports_file_not_found() {
    let tmp = TempDir::new().unwrap();
    let (mut server, addr) = start_server(tmp.path());

    let response = common::rpc_request(
        &addr,
        r#"{"rpc":"transfer_file","payload":"{\"type\":\"not_existed\",\"version\":\"1.0.0\"}"}"#,
    );
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();

    assert_eq!(parsed["ok"], false, "envelope: {response}");
    assert_eq!(parsed["code"], 13);
    assert_eq!(parsed["message"], "file not found");

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn unknown_rpc_name_reports_not_found_code() {
    let tmp = TempDir::new().unwrap();
    let (mut server, addr) = start_server(tmp.path());

    let response = common::rpc_request(&addr, r#"{"rpc":"no_such_rpc","payload":""}"#);
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();

    assert_eq!(parsed["ok"], false, "envelope: {response}");
    assert_eq!(parsed["code"], 5);

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn malformed_envelope_reports_unmarshal() {
    let tmp = TempDir::new().unwrap();
    let (mut server, addr) = start_server(tmp.path());

    let response = common::rpc_request(&addr, "this is not json");
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();

    assert_eq!(parsed["ok"], false, "envelope: {response}");
    assert_eq!(parsed["code"], 13);
    assert_eq!(parsed["message"], "cannot unmarshal type");

    let _ = server.kill();
    let _ = server.wait();
}

#[test]
fn one_connection_carries_many_requests() {
    use std::io::{BufRead, BufReader, Write};

    let tmp = TempDir::new().unwrap();
    common::write_asset(tmp.path(), "core", "1.0.0", common::FIXTURE.as_bytes());
    let (mut server, addr) = start_server(tmp.path());

    let mut stream = std::net::TcpStream::connect(&addr).expect("connect");
    stream
        .set_read_timeout(Some(std::time::Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    for _ in 0..3 {
        writeln!(
            stream,
            r#"{{"rpc":"transfer_file","payload":"{{\"type\":\"core\",\"version\":\"1.0.0\"}}"}}"#
        )
        .unwrap();
        stream.flush().unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["ok"], true, "envelope: {line}");
        assert_eq!(parsed["payload"].as_str().unwrap(), common::GOLDEN_RESPONSE);
    }

    let _ = server.kill();
    let _ = server.wait();
}
