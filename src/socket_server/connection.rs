//! WebSocket connection handler
//!
//! Owns one accepted socket: performs the upgrade handshake, then runs a
//! blocking receive loop that reassembles fragmented messages, answers
//! control frames itself and hands completed TEXT envelopes to the
//! [`Dispatcher`].
//!
//! Writes go through a [`FrameSender`], a cloneable handle that save/load
//! worker threads also hold, so every outbound frame is serialized by one
//! lock.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatch::Dispatcher;
use super::frame::{self, Frame, Opcode};
use super::handshake::{self, AcceptResponse, HttpRequest, MAX_REQUEST_SIZE};
use super::project::ProjectState;
use super::protocol::{is_envelope, ServerMessage};
use crate::error::{Result, ServerError};

/// Version of the JSON envelope protocol announced on open
pub const PROTOCOL_VERSION: u32 = 1;

/// Close status sent when the client never gave one
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// What the receive loop does after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Generate a short connection id, e.g. `conn_1a2b3c4d`
pub fn connection_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("conn_{}", &uuid[..8])
}

// ============================================================================
// Outbound
// ============================================================================

/// Cloneable write half of a connection.
///
/// Once a CLOSE frame has gone out, further sends fail with a state error.
#[derive(Clone)]
pub struct FrameSender {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    closed: Arc<AtomicBool>,
}

impl FrameSender {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write bytes outside the frame layer (the handshake response).
    pub fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock();
        if self.is_closed() {
            return Err(ServerError::state("connection is closed"));
        }
        frame::write_frame(&mut *writer, frame)?;
        if frame.opcode == Opcode::Close {
            self.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Serialize `message` into a TEXT frame and send it.
    pub fn send(&self, message: &ServerMessage) -> Result<()> {
        let json = message.to_json()?;
        tracing::trace!("-> {}", json);
        self.send_frame(&Frame::text(json))
    }
}

impl std::fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Everything a handler needs to act on behalf of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: String,
    pub sender: FrameSender,
    pub state: Arc<Mutex<ProjectState>>,
}

// ============================================================================
// Inbound
// ============================================================================

/// Reader that replays bytes read past the handshake before the socket.
struct Inbound<R> {
    carry: Vec<u8>,
    pos: usize,
    inner: R,
}

impl<R: Read> Inbound<R> {
    fn new(inner: R) -> Self {
        Self {
            carry: Vec::new(),
            pos: 0,
            inner,
        }
    }

    fn push_back(&mut self, bytes: Vec<u8>) {
        self.carry = bytes;
        self.pos = 0;
    }
}

impl<R: Read> Read for Inbound<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.carry.len() {
            let n = buf.len().min(self.carry.len() - self.pos);
            buf[..n].copy_from_slice(&self.carry[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.carry.len() {
                self.carry.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

/// Message being reassembled from fragments
struct Fragment {
    opcode: Opcode,
    payload: Vec<u8>,
}

// ============================================================================
// Session
// ============================================================================

/// State for a single connection
pub struct Session<R> {
    inbound: Inbound<R>,
    ctx: ConnectionContext,
    dispatcher: Dispatcher,
    max_payload: u64,
    handshake_complete: bool,
    fragment: Option<Fragment>,
}

impl<R: Read> Session<R> {
    pub fn new(
        id: String,
        reader: R,
        writer: impl Write + Send + 'static,
        dispatcher: Dispatcher,
        max_payload: u64,
    ) -> Self {
        let state = dispatcher.new_state();
        Self {
            inbound: Inbound::new(reader),
            ctx: ConnectionContext {
                id,
                sender: FrameSender::new(writer),
                state: Arc::new(Mutex::new(state)),
            },
            dispatcher,
            max_payload,
            handshake_complete: false,
            fragment: None,
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Run until either side closes.
    ///
    /// `Ok` covers a graceful close and a peer that hangs up before
    /// upgrading; `Err` is always fatal.
    pub fn run(&mut self) -> Result<()> {
        if !self.handshake()? {
            tracing::debug!("Peer disconnected before upgrading");
            return Ok(());
        }
        self.on_open()?;

        loop {
            let frame = frame::read_frame(&mut self.inbound, self.max_payload)?;
            tracing::debug!(
                "<- {:?} fin={} len={}",
                frame.opcode,
                frame.fin,
                frame.payload.len()
            );
            if self.handle_frame(frame)? == Flow::Close {
                return Ok(());
            }
        }
    }

    /// Accumulate request bytes until an upgrade succeeds.
    ///
    /// Returns `false` if the peer hung up first. Requests that do not
    /// upgrade are dropped and the connection keeps waiting.
    fn handshake(&mut self) -> Result<bool> {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        loop {
            while let Some(end) = handshake::find_request_end(&buf) {
                let rest = buf.split_off(end);
                let head = std::mem::replace(&mut buf, rest);
                match upgrade(&head) {
                    Ok(response) => {
                        self.ctx.sender.send_raw(&response.response_bytes())?;
                        self.inbound.push_back(buf);
                        self.handshake_complete = true;
                        tracing::info!("Handshake complete");
                        return Ok(true);
                    }
                    Err(e) => tracing::warn!("Ignoring request: {}", e),
                }
            }

            if buf.len() > MAX_REQUEST_SIZE {
                return Err(ServerError::protocol(format!(
                    "upgrade request exceeds {} bytes",
                    MAX_REQUEST_SIZE
                )));
            }

            let n = match self.inbound.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Announce version and properties to a freshly upgraded client.
    fn on_open(&mut self) -> Result<()> {
        let sender = &self.ctx.sender;
        sender.send(&ServerMessage::Version {
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: PROTOCOL_VERSION,
        })?;

        let (properties, had_file) = {
            let mut state = self.ctx.state.lock();
            let had_file = state.close_file();
            (state.properties().clone(), had_file)
        };
        sender.send(&ServerMessage::Properties { properties })?;
        if had_file {
            sender.send(&ServerMessage::FileClosed)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<Flow> {
        if frame.opcode.is_control() {
            return self.handle_control(frame);
        }

        let (opcode, payload) = if frame.opcode == Opcode::Continuation {
            let Some(mut fragment) = self.fragment.take() else {
                return Err(ServerError::protocol(
                    "continuation frame without an open message",
                ));
            };
            let total = fragment.payload.len() as u64 + frame.payload.len() as u64;
            if total > self.max_payload {
                return Err(ServerError::protocol(format!(
                    "reassembled message of {} bytes exceeds {}",
                    total, self.max_payload
                )));
            }
            fragment.payload.extend_from_slice(&frame.payload);
            if !frame.fin {
                self.fragment = Some(fragment);
                return Ok(Flow::Continue);
            }
            (fragment.opcode, fragment.payload)
        } else {
            if self.fragment.is_some() {
                return Err(ServerError::protocol(
                    "data frame while a fragmented message is open",
                ));
            }
            if !frame.fin {
                self.fragment = Some(Fragment {
                    opcode: frame.opcode,
                    payload: frame.payload,
                });
                return Ok(Flow::Continue);
            }
            (frame.opcode, frame.payload)
        };

        self.deliver(opcode, payload)
    }

    fn handle_control(&mut self, frame: Frame) -> Result<Flow> {
        match frame.opcode {
            Opcode::Close => {
                let code = match frame.close_reason() {
                    Some((code, reason)) if frame::is_valid_close_code(code) => {
                        tracing::info!("Client requested close ({}) {}", code, reason);
                        code
                    }
                    Some((code, _)) => {
                        tracing::warn!("Client sent invalid close status {}", code);
                        CLOSE_PROTOCOL_ERROR
                    }
                    None if !frame.payload.is_empty() => {
                        tracing::warn!("Client sent a 1-byte close payload");
                        CLOSE_PROTOCOL_ERROR
                    }
                    None => {
                        tracing::info!("Client requested close");
                        CLOSE_NORMAL
                    }
                };
                self.ctx.sender.send_frame(&Frame::close(Some(code), None))?;
                Ok(Flow::Close)
            }
            Opcode::Ping => {
                self.ctx.sender.send_frame(&Frame::pong(Vec::new()))?;
                Ok(Flow::Continue)
            }
            _ => Ok(Flow::Continue),
        }
    }

    /// Route one complete application message.
    fn deliver(&mut self, opcode: Opcode, payload: Vec<u8>) -> Result<Flow> {
        if opcode != Opcode::Text {
            tracing::debug!("Ignoring {:?} message of {} bytes", opcode, payload.len());
            return Ok(Flow::Continue);
        }

        let text = match String::from_utf8(payload) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!("Ignoring TEXT message that is not UTF-8");
                return Ok(Flow::Continue);
            }
        };
        if !is_envelope(&text) {
            tracing::warn!("Ignoring non-envelope TEXT message: {:.80}", text);
            return Ok(Flow::Continue);
        }

        let flow = match self.dispatcher.dispatch(&text, &self.ctx) {
            Ok(flow) => flow,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Error handling message: {}", e);
                Flow::Continue
            }
        };

        if flow == Flow::Close {
            tracing::info!("Closing at client request");
            self.ctx
                .sender
                .send_frame(&Frame::close(Some(CLOSE_NORMAL), None))?;
        }
        Ok(flow)
    }
}

fn upgrade(head: &[u8]) -> Result<AcceptResponse> {
    let request = HttpRequest::parse(head)?;
    handshake::accept(&request)
}

/// Handle a single accepted connection until it closes
pub fn handle_connection(stream: TcpStream, dispatcher: Dispatcher, max_payload: u64) {
    let id = connection_id();
    let peer = stream.peer_addr().ok();
    let span = tracing::info_span!("connection", id = %id, peer = ?peer);
    let _enter = span.enter();
    tracing::info!("New connection");

    let (reader, writer) = match (stream.try_clone(), stream.try_clone()) {
        (Ok(reader), Ok(writer)) => (reader, writer),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Failed to clone socket: {}", e);
            return;
        }
    };

    let mut session = Session::new(id, reader, writer, dispatcher, max_payload);
    match session.run() {
        Ok(()) => tracing::info!("Connection closed"),
        Err(ServerError::Transport(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            tracing::info!("Peer disconnected");
        }
        Err(e @ ServerError::ProtocolViolation { .. }) => {
            tracing::warn!("Closing connection: {}", e);
            if session.handshake_complete() {
                let _ = session
                    .context()
                    .sender
                    .send_frame(&Frame::close(Some(CLOSE_PROTOCOL_ERROR), None));
            }
        }
        Err(e) => tracing::error!("Connection failed: {}", e),
    }

    let _ = stream.shutdown(Shutdown::Both);
}
