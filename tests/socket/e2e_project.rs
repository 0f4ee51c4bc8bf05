//! Save and load through the real socket

use std::fs;

use serde_json::json;

use bedrock_devserver::socket_server::project_file::{ProjectFile, META_START};

use crate::common::client::{b64, unb64};
use crate::common::{TestServer, WsClient};

#[test]
fn test_save_then_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arena.mcs");
    let server = TestServer::start();
    *server.dialog.save_path.lock() = Some(path.clone());
    *server.dialog.open_path.lock() = Some(path.clone());

    let mut writer = WsClient::connect_ready(server.addr);
    writer.send_json(json!({"action": "property", "name": b64("decorate"), "value": b64("true")}));
    writer.send_json(json!({
        "action": "save",
        "code": b64("function main() {\n  say (hi)\n}\n"),
        "meta": b64(r#"{"open":["main"]}"#),
    }));
    let seen = writer.recv_until("notification");
    assert_eq!(seen[0]["action"], "saved");
    assert_eq!(seen[0]["path"], path.display().to_string());

    let saved = fs::read_to_string(&path).unwrap();
    assert!(saved.starts_with(META_START));
    let parsed = ProjectFile::parse(&saved);
    assert_eq!(parsed.properties.unwrap()["decorate"], "true");

    let mut reader = WsClient::connect_ready(server.addr);
    reader.send_json(json!({"action": "load"}));
    let seen = reader.recv_until("busy");
    let actions: Vec<_> = seen.iter().map(|m| m["action"].clone()).collect();
    assert_eq!(actions, vec!["load", "properties", "seterrors", "lint", "busy"]);
    assert_eq!(unb64(&seen[0]["code"]), "function main() {\n  say (hi)\n}\n");
    assert_eq!(seen[0]["meta"], json!({"open": ["main"]}));
    assert_eq!(seen[1]["properties"]["decorate"], "true");
    assert_eq!(seen[3]["functions"], json!(["main"]));
}

#[test]
fn test_load_plain_file_with_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.mcs");
    fs::write(&path, "say hi\nsay )\n").unwrap();

    let server = TestServer::start();
    *server.dialog.open_path.lock() = Some(path);

    let mut client = WsClient::connect_ready(server.addr);
    client.send_json(json!({"action": "load"}));
    let seen = client.recv_until("busy");
    assert_eq!(seen[0]["meta"], serde_json::Value::Null);
    let errors = seen.iter().find(|m| m["action"] == "seterrors").unwrap();
    assert_eq!(errors["errors"][0]["line"], 2);
}

#[test]
fn test_canceled_save_keeps_connection_open() {
    let server = TestServer::start();
    let mut client = WsClient::connect_ready(server.addr);

    client.send_json(json!({"action": "save", "code": b64("say hi")}));
    let notice = client.recv_json();
    assert_eq!(notice["action"], "notification");
    assert_eq!(unb64(&notice["text"]), "Save canceled");

    client.send_json(json!({"action": "ping"}));
    assert_eq!(client.recv_json()["action"], "notification");
}
