//! Devserver Socket Server
//!
//! A hand-rolled WebSocket (RFC 6455) server that lets an editor front end
//! drive the compiler: lint, compile, save/load project files and toggle
//! compiler flags over one long-lived connection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    DEVSERVER SOCKET SERVER (bedrock-devserver)          │
//! │                  Thread per connection, blocking std::net I/O           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Listener ──► accept ──► thread ──► Session                             │
//! │                                       │                                 │
//! │                 handshake (HTTP upgrade, accept key)                    │
//! │                                       │                                 │
//! │                 frame::read_frame ──► fragments / control frames        │
//! │                                       │                                 │
//! │                 Dispatcher ──► ProjectState (Arc<Mutex>)                │
//! │                      │                                                  │
//! │                      ├──► Compiler (lint / compile)                     │
//! │                      └──► save / load worker threads ──► FileDialog     │
//! │                                                                         │
//! │  CompilerFlags (process-wide, last writer wins)                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! After the upgrade, every application message is a JSON TEXT frame:
//!
//! ```json
//! // Client -> Server
//! {"action": "lint", "code": "<base64>"}
//! {"action": "property", "name": "<base64>", "value": "<base64>"}
//! {"action": "save", "code": "<base64>", "meta": "<base64 json>"}
//!
//! // Server -> Client
//! {"action": "seterrors", "errors": [{"line": 3, "error": "<base64>"}]}
//! {"action": "notification", "text": "<base64>", "color": "#4caf50"}
//! {"action": "busy", "busy": false}
//! ```

pub mod connection;
pub mod dispatch;
pub mod frame;
pub mod handshake;
pub mod listener;
pub mod project;
pub mod project_file;
pub mod properties;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{handle_connection, ConnectionContext, Flow, FrameSender, Session};
pub use dispatch::Dispatcher;
pub use frame::{Frame, FrameError, Opcode};
pub use listener::{Listener, ListenerHandle};
pub use project::ProjectState;
pub use properties::{CompilerFlags, FlagSnapshot, PropertyRegistry};
pub use protocol::{ClientAction, Color, ServerMessage};
