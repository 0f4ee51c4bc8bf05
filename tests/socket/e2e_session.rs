//! Handshake, control frames, fragmentation and the lint round trip

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use serde_json::json;

use bedrock_devserver::socket_server::frame::{Frame, FrameError, Opcode};

use crate::common::client::{b64, unb64};
use crate::common::{TestServer, WsClient};

/// The server has finished with the connection: a CLOSE frame or EOF.
fn assert_closed(client: &mut WsClient, expected_code: Option<u16>) {
    loop {
        match client.recv() {
            Ok(frame) if frame.opcode == Opcode::Close => {
                if let Some(code) = expected_code {
                    assert_eq!(frame.close_reason().map(|(c, _)| c), Some(code));
                }
                break;
            }
            Ok(_) => continue,
            Err(FrameError::Truncated { .. }) => break,
            Err(FrameError::Io(e)) if e.kind() == ErrorKind::ConnectionReset => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}

#[test]
fn test_handshake_accept_key() {
    let server = TestServer::start();
    let mut client = WsClient::connect(server.addr);

    assert!(client
        .response
        .starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(client.response.contains("Upgrade: Websocket\r\n"));
    assert!(client.response.contains("Connection: Upgrade\r\n"));
    assert!(client
        .response
        .contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    let version = client.recv_json();
    assert_eq!(version["action"], "version");
    assert_eq!(version["version"], env!("CARGO_PKG_VERSION"));
    let properties = client.recv_json();
    assert_eq!(
        properties["properties"],
        json!({"debug": "false", "decorate": "false", "export_all": "false"})
    );
}

#[test]
fn test_ping_then_close_action() {
    let server = TestServer::start();
    let mut client = WsClient::connect_ready(server.addr);

    client.send_json(json!({"action": "ping"}));
    let reply = client.recv_json();
    assert_eq!(reply["action"], "notification");
    assert!(!unb64(&reply["text"]).is_empty());

    client.send_json(json!({"action": "close"}));
    let frame = client.recv().unwrap();
    assert_eq!(frame.opcode, Opcode::Close);
    assert_eq!(frame.close_reason().unwrap().0, 1000);
}

#[test]
fn test_client_close_is_echoed() {
    let server = TestServer::start();
    let mut client = WsClient::connect_ready(server.addr);

    client.send_frame(Frame::close(Some(1001), Some("tab closed")));
    assert_closed(&mut client, Some(1001));
}

#[test]
fn test_control_ping_gets_pong() {
    let server = TestServer::start();
    let mut client = WsClient::connect_ready(server.addr);

    client.send_frame(Frame::ping(b"are you there".to_vec()));
    let pong = client.recv().unwrap();
    assert_eq!(pong.opcode, Opcode::Pong);
    assert!(pong.payload.is_empty());
}

#[test]
fn test_lint_invalid_source_reports_line() {
    let server = TestServer::start();
    let mut client = WsClient::connect_ready(server.addr);

    client.send_json(json!({"action": "lint", "code": b64("say hi\n\nsay (unclosed\n")}));
    let errors = client.recv_json();
    assert_eq!(errors["action"], "seterrors");
    let entry = &errors["errors"][0];
    assert_eq!(entry["line"], 3);
    assert!(unb64(&entry["error"]).starts_with("TokenizerError"));

    assert_eq!(client.recv_json(), json!({"action": "busy", "busy": false}));
}

#[test]
fn test_fragmented_lint_dispatched_once() {
    let server = TestServer::start();
    let mut client = WsClient::connect_ready(server.addr);

    let message = json!({"action": "lint", "code": b64("say (ok)")}).to_string();
    let bytes = message.as_bytes();
    let third = bytes.len() / 3;
    client.send_frame(Frame::new(Opcode::Text, false, bytes[..third].to_vec()));
    client.send_frame(Frame::continuation(bytes[third..2 * third].to_vec(), false));
    client.send_frame(Frame::continuation(bytes[2 * third..].to_vec(), true));
    client.send_json(json!({"action": "ping"}));

    let seen = client.recv_until("notification");
    let actions: Vec<_> = seen.iter().map(|m| m["action"].clone()).collect();
    assert_eq!(actions, vec!["seterrors", "lint", "busy", "notification"]);
    assert_eq!(server.compiler.lint_flags.lock().len(), 1);
}

#[test]
fn test_reserved_bits_close_connection() {
    let server = TestServer::start();
    let mut client = WsClient::connect_ready(server.addr);

    // FIN + RSV1 + TEXT, unmasked, empty payload
    client.send_raw(&[0xC1, 0x00]);
    assert_closed(&mut client, Some(1002));
}

#[test]
fn test_large_frame_uses_extended_length() {
    let server = TestServer::start();
    let mut client = WsClient::connect_ready(server.addr);

    // A 70 KB TEXT envelope exercises the 64-bit length path.
    let code = format!("say hi\n{}", " ".repeat(70 * 1024));
    client.send_json(json!({"action": "lint", "code": b64(&code)}));
    let seen = client.recv_until("busy");
    assert_eq!(seen[0]["errors"], json!([]));
}

#[test]
fn test_flags_are_shared_across_connections() {
    let server = TestServer::start();
    let mut first = WsClient::connect_ready(server.addr);
    let mut second = WsClient::connect_ready(server.addr);

    first.send_json(json!({"action": "property", "name": b64("debug"), "value": b64("true")}));
    // Order the property before the lint on the other connection.
    first.send_json(json!({"action": "ping"}));
    first.recv_until("notification");

    second.send_json(json!({"action": "lint", "code": b64("say hi")}));
    second.recv_until("busy");
    let flags = server.compiler.lint_flags.lock();
    assert!(flags.last().unwrap().debug);
}

#[test]
fn test_non_upgrade_request_gets_no_response() {
    let server = TestServer::start();
    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buf = [0u8; 64];
    match stream.read(&mut buf) {
        Ok(n) => assert_eq!(n, 0, "unexpected response"),
        Err(e) => assert!(matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)),
    }
}

#[test]
fn test_shutdown_stops_accepting() {
    let mut server = TestServer::start();
    let addr = server.addr;
    server.stop();
    thread::sleep(Duration::from_millis(50));
    assert!(TcpStream::connect(addr).is_err());
}
