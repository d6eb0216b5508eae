//! Application configuration
//!
//! Loaded from TOML. Every field has a default, so a partial file (or none at
//! all) is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::Error;
use crate::network::endpoint::{Endpoint, Host};
use crate::video::PixelFormat;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub source: SourceConfig,
    pub logging: LoggingConfig,
}

/// Transport endpoints and socket tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Where JPEG frames are published
    pub publish_endpoint: Endpoint,
    /// Where control messages are received
    pub control_endpoint: Endpoint,
    pub listen_backlog: i32,
    pub handshake_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub max_message_size: usize,
    /// Unread messages kept per subscribe socket; further arrivals are dropped
    pub receive_queue_len: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            publish_endpoint: Endpoint::tcp(Host::Wildcard, DEFAULT_PUBLISH_PORT),
            control_endpoint: Endpoint::tcp(Host::Ip(Ipv4Addr::LOCALHOST.into()), DEFAULT_CONTROL_PORT),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            receive_queue_len: DEFAULT_RECEIVE_QUEUE_LEN,
        }
    }
}

/// Synthetic frame source used by the publisher binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Delay between published frames
    pub interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Yuvj420p,
            interval_ms: 1000 / STREAM_FPS as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl AppConfig {
    /// Per-user config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "frame-publisher")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path`, or the default location, falling back to defaults
    /// when no file exists
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        let network = &self.network;
        if network.listen_backlog <= 0 {
            return Err(Error::Config("network.listen_backlog must be positive".into()));
        }
        if network.handshake_timeout_ms == 0 || network.send_timeout_ms == 0 {
            return Err(Error::Config("network timeouts must be positive".into()));
        }
        if network.max_message_size == 0 {
            return Err(Error::Config("network.max_message_size must be positive".into()));
        }
        if network.receive_queue_len == 0 {
            return Err(Error::Config("network.receive_queue_len must be positive".into()));
        }
        if network.publish_endpoint.conflicts_with(&network.control_endpoint) {
            return Err(Error::Config(format!(
                "publish endpoint {} and control endpoint {} share a port",
                network.publish_endpoint, network.control_endpoint
            )));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(Error::Config("source dimensions must be positive".into()));
        }
        if self.source.interval_ms == 0 {
            return Err(Error::Config("source.interval_ms must be positive".into()));
        }
        Ok(())
    }
}
