//! Error types and exit codes for bedrock-devserver

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for devserver operations
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed frame header or illegal frame sequence; fatal to the connection
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Socket failure; fatal to the connection
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Upgrade request missing required headers; the connection never upgrades
    #[error("Handshake rejected: {reason}")]
    HandshakeRejected { reason: String },

    /// Bad envelope or collaborator failure; reported to the client
    #[error("Action failed: {message}")]
    Action { message: String },

    /// Request not valid for the current session state; reported to the client
    #[error("Invalid state: {message}")]
    State { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Whether this error must terminate the connection it occurred on.
    ///
    /// Protocol and transport failures are fatal; everything else is
    /// reported to the client and the session keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. } | Self::Transport(_))
    }

    /// Convert error to an exit code for the daemon binary:
    /// - 1: Transport / bind failure
    /// - 2: Configuration error
    /// - 3: Anything else reaching the top level
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Transport(_) => ExitCode::from(1),
            Self::Config { .. } => ExitCode::from(2),
            _ => ExitCode::from(3),
        }
    }
}

/// Result type alias for devserver operations
pub type Result<T> = std::result::Result<T, ServerError>;
