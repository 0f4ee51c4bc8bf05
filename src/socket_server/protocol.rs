//! Socket server protocol message types
//!
//! Every application message is a JSON object with an `action` field,
//! carried in a TEXT frame. String payloads that may contain arbitrary text
//! (source code, property values, notification text) travel base64-encoded.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::compiler::{CompileDiagnostic, SymbolListing};
use crate::error::{Result, ServerError};

/// Client-to-server action, decoded once at the connection boundary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientAction {
    Ping,
    /// `name` and `value` are base64
    Property { name: String, value: String },
    Info,
    #[serde(rename = "openfolder")]
    OpenFolder { folder: String },
    /// `code` is base64
    Lint { code: String },
    /// `code` and `project` are base64
    Compile {
        code: String,
        #[serde(default)]
        project: Option<String>,
    },
    /// `code` is base64; `meta` is base64 JSON
    Save {
        code: String,
        #[serde(default)]
        meta: Option<String>,
    },
    Load,
    Close,
    /// Action name this build does not handle; `None` when the envelope
    /// has no `action` at all
    #[serde(skip)]
    Unknown(Option<String>),
}

const KNOWN_ACTIONS: &[&str] = &[
    "ping",
    "property",
    "info",
    "openfolder",
    "lint",
    "compile",
    "save",
    "load",
    "close",
];

impl ClientAction {
    /// Decode an envelope.
    ///
    /// Unknown or missing action names decode to [`ClientAction::Unknown`];
    /// invalid JSON and malformed fields of a known action are errors.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ServerError::action(format!("envelope is not valid JSON: {}", e)))?;
        let Some(name) = value.get("action").and_then(|v| v.as_str()) else {
            return Ok(Self::Unknown(None));
        };

        if !KNOWN_ACTIONS.contains(&name) {
            return Ok(Self::Unknown(Some(name.to_string())));
        }
        let name = name.to_string();
        serde_json::from_value(value)
            .map_err(|e| ServerError::action(format!("malformed {} envelope: {}", name, e)))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Property { .. } => "property",
            Self::Info => "info",
            Self::OpenFolder { .. } => "openfolder",
            Self::Lint { .. } => "lint",
            Self::Compile { .. } => "compile",
            Self::Save { .. } => "save",
            Self::Load => "load",
            Self::Close => "close",
            Self::Unknown(Some(name)) => name,
            Self::Unknown(None) => "<missing>",
        }
    }
}

/// Whether a TEXT payload looks like a JSON envelope.
pub fn is_envelope(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('{') && trimmed.ends_with('}')
}

pub fn encode_b64(text: &str) -> String {
    STANDARD.encode(text)
}

/// Decode a base64 field into UTF-8 text.
pub fn decode_b64(field: &str, encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ServerError::action(format!("field {} is not base64: {}", field, e)))?;
    String::from_utf8(bytes)
        .map_err(|_| ServerError::action(format!("field {} is not UTF-8", field)))
}

/// Notification colors understood by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Success,
    Info,
    Warning,
    Error,
}

impl Color {
    pub fn css(self) -> &'static str {
        match self {
            Self::Success => "#4caf50",
            Self::Info => "#2196f3",
            Self::Warning => "#ff9800",
            Self::Error => "#f44336",
        }
    }
}

/// One entry of a `seterrors` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub line: u32,
    /// base64
    pub error: String,
}

impl From<&CompileDiagnostic> for ErrorEntry {
    fn from(diag: &CompileDiagnostic) -> Self {
        Self {
            line: diag.line,
            error: encode_b64(&diag.describe()),
        }
    }
}

/// Server-to-client message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ServerMessage {
    Version {
        version: String,
        protocol: u32,
    },
    Properties {
        properties: BTreeMap<String, String>,
    },
    #[serde(rename = "fileclosed")]
    FileClosed,
    Notification {
        text: String,
        color: String,
    },
    Busy {
        busy: bool,
    },
    #[serde(rename = "seterrors")]
    SetErrors {
        errors: Vec<ErrorEntry>,
    },
    Lint(SymbolListing),
    Menu {
        title: String,
        body: String,
    },
    Load {
        code: String,
        meta: Option<serde_json::Value>,
        path: String,
    },
    Saved {
        path: String,
    },
}

impl ServerMessage {
    pub fn notify(text: &str, color: Color) -> Self {
        Self::Notification {
            text: encode_b64(text),
            color: color.css().to_string(),
        }
    }

    /// Notification describing a non-fatal failure.
    ///
    /// State errors (canceled prompts, closed files) read as warnings.
    pub fn failure(err: &ServerError) -> Self {
        match err {
            ServerError::State { message } => Self::notify(message, Color::Warning),
            ServerError::Action { message } => Self::notify(message, Color::Error),
            other => Self::notify(&other.to_string(), Color::Error),
        }
    }

    pub fn errors(diagnostics: &[CompileDiagnostic]) -> Self {
        Self::SetErrors {
            errors: diagnostics.iter().map(ErrorEntry::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
