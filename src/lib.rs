//! Bedrock devserver: drive the compiler from an editor over a WebSocket
//!
//! The library holds a hand-rolled RFC 6455 transport and a JSON action
//! dispatcher. The compiler itself, file dialogs and folder opening are
//! external collaborators reached through the [`compiler::Compiler`],
//! [`desktop::FileDialog`] and [`desktop::FolderOpener`] traits.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bedrock_devserver::{Dispatcher, ExternalCompiler, Listener, ServerConfig};
//! use bedrock_devserver::desktop::{SystemOpener, ZenityDialog};
//!
//! let config = ServerConfig::load()?;
//! let dispatcher = Dispatcher::new(
//!     Arc::new(ExternalCompiler::from_config(&config.compiler)),
//!     Arc::new(ZenityDialog::detect()),
//!     Arc::new(SystemOpener),
//! )
//! .with_config(&config);
//!
//! let listener = Listener::bind(config.bind_address(), dispatcher, config.server.max_payload_size)?;
//! listener.run()?;
//! ```

pub mod compiler;
pub mod config;
pub mod desktop;
pub mod error;
pub mod socket_server;

// Re-export commonly used types
pub use compiler::{CompileDiagnostic, CompileOutcome, Compiler, ExternalCompiler, SymbolListing};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use socket_server::{Dispatcher, Listener, ListenerHandle};
