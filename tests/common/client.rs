//! Blocking WebSocket test client

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use bedrock_devserver::socket_server::frame::{self, Frame, FrameError, Opcode, DEFAULT_MAX_PAYLOAD};

pub const TEST_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

pub struct WsClient {
    stream: TcpStream,
    /// Raw handshake response
    pub response: String,
}

impl WsClient {
    /// Connect and upgrade, leaving the open messages unread.
    pub fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let request = format!(
            "GET / HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
            addr, TEST_KEY
        );
        stream.write_all(request.as_bytes()).expect("send request");

        // Byte at a time so no frame bytes are swallowed.
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).expect("read response");
            head.push(byte[0]);
        }

        Self {
            stream,
            response: String::from_utf8(head).expect("ascii response"),
        }
    }

    /// Connect and consume the `version` and `properties` greeting.
    pub fn connect_ready(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr);
        assert_eq!(client.recv_json()["action"], "version");
        assert_eq!(client.recv_json()["action"], "properties");
        client
    }

    pub fn send_frame(&mut self, frame: Frame) {
        let bytes = frame::encode(&frame.masked(MASK)).expect("encode");
        self.stream.write_all(&bytes).expect("send frame");
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("send raw");
    }

    pub fn send_json(&mut self, value: serde_json::Value) {
        self.send_frame(Frame::text(value.to_string()));
    }

    pub fn recv(&mut self) -> Result<Frame, FrameError> {
        frame::read_frame(&mut self.stream, DEFAULT_MAX_PAYLOAD)
    }

    /// Next TEXT message as JSON, skipping control frames.
    pub fn recv_json(&mut self) -> serde_json::Value {
        loop {
            let frame = self.recv().expect("frame");
            if frame.opcode == Opcode::Text {
                return serde_json::from_slice(&frame.payload).expect("json message");
            }
            assert_ne!(frame.opcode, Opcode::Close, "connection closed early");
        }
    }

    /// Messages up to and including the first with `action`.
    pub fn recv_until(&mut self, action: &str) -> Vec<serde_json::Value> {
        let mut seen = Vec::new();
        loop {
            let message = self.recv_json();
            let done = message["action"] == action;
            seen.push(message);
            if done {
                return seen;
            }
        }
    }
}

pub fn b64(text: &str) -> String {
    STANDARD.encode(text)
}

pub fn unb64(value: &serde_json::Value) -> String {
    let bytes = STANDARD
        .decode(value.as_str().expect("string field"))
        .expect("base64 field");
    String::from_utf8(bytes).expect("utf-8 field")
}
