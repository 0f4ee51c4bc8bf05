//! Devserver configuration management.
//!
//! Reads the configuration file at:
//! - Linux: ~/.config/bedrock-devserver/config.toml
//! - macOS: ~/Library/Application Support/bedrock-devserver/config.toml
//! - Windows: %APPDATA%\bedrock-devserver\config.toml
//!
//! Every section is optional; missing keys take their defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::socket_server::frame::DEFAULT_MAX_PAYLOAD;

pub const APP_DIR: &str = "bedrock-devserver";

/// Devserver configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,

    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Frames declaring a larger payload are rejected
    #[serde(default = "default_max_payload")]
    pub max_payload_size: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5678
}

fn default_max_payload() -> u64 {
    DEFAULT_MAX_PAYLOAD
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_payload_size: default_max_payload(),
        }
    }
}

/// External compiler invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilerConfig {
    #[serde(default = "default_compiler_command")]
    pub command: String,

    /// Appended after the generated arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_compiler_command() -> String {
    "bedrock-compiler".to_string()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            command: default_compiler_command(),
            extra_args: Vec::new(),
        }
    }
}

/// Where compiled packs go
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    #[serde(default)]
    pub behavior_pack: Option<PathBuf>,

    #[serde(default)]
    pub resource_pack: Option<PathBuf>,

    /// Installation directory shown by `openfolder install`
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Default config file location, if a config directory exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load from the default path, or defaults when there is no file
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ServerError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::parse(&content).map_err(|e| ServerError::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ServerError::Config {
            message: format!("Failed to parse config: {}", e),
        })
    }

    /// `host:port` for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
