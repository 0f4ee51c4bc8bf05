//! HTTP upgrade handshake (RFC 6455 §4)
//!
//! ```http
//! GET / HTTP/1.1
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! ```
//!
//! is answered with
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: Websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use std::collections::HashMap;

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::{Result, ServerError};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on buffered request bytes before the upgrade completes.
pub const MAX_REQUEST_SIZE: usize = 8 * 1024;

/// `base64(SHA1(client_key + GUID))`
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Byte offset just past the blank line ending the request head, if present.
///
/// Accepts `\r\n\r\n` or a bare `\n\n`, whichever ends first, so bytes
/// pipelined after the head are never pulled into it.
pub fn find_request_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4);
    let lf = buf
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| pos + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Request line plus headers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Lowercased names
    headers: HashMap<String, String>,
}

impl HttpRequest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|_| ServerError::HandshakeRejected {
            reason: "request is not valid UTF-8".to_string(),
        })?;

        let mut lines = text.lines();
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or("/").to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self {
            method,
            path,
            headers,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// Computed answer to an accepted upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptResponse {
    pub accept_key: String,
}

impl AcceptResponse {
    pub fn response_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: Websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            self.accept_key
        )
        .into_bytes()
    }
}

/// Check the upgrade headers and compute the accept key.
///
/// `Connection` must contain the `Upgrade` token (case-insensitive, may be
/// one of several comma-separated tokens) and `Sec-WebSocket-Key` must be
/// present.
pub fn accept(request: &HttpRequest) -> Result<AcceptResponse> {
    if !request.is_get() {
        return Err(ServerError::HandshakeRejected {
            reason: format!("method {} is not GET", request.method),
        });
    }

    let upgrade = request
        .header("connection")
        .map(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);
    if !upgrade {
        return Err(ServerError::HandshakeRejected {
            reason: "missing Connection: Upgrade".to_string(),
        });
    }

    let key = request
        .header("sec-websocket-key")
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ServerError::HandshakeRejected {
            reason: "missing Sec-WebSocket-Key".to_string(),
        })?;

    Ok(AcceptResponse {
        accept_key: compute_accept_key(key),
    })
}
