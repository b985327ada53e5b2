// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! Configuration is stored in `<config_dir>/tether/config.toml` and holds one
//! section per backend endpoint:
//! - `[command]`: the generic call endpoint
//! - `[session]`: the agent-session endpoint
//!
//! A missing file yields the defaults; missing keys take their default value.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONFIG_DIR_NAME: &str = "tether";
const CONFIG_FILE_NAME: &str = "config.toml";

const DEFAULT_COMMAND_URL: &str = "ws://127.0.0.1:17432";
const DEFAULT_SESSION_URL: &str = "ws://127.0.0.1:17433";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Generic call endpoint.
    #[serde(default = "default_command_endpoint")]
    pub command: EndpointConfig,
    /// Agent-session endpoint.
    #[serde(default = "default_session_endpoint")]
    pub session: EndpointConfig,
}

/// Settings for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// WebSocket URL (`ws://...`).
    pub url: String,
    /// Time a written request may wait for its reply (default: 10000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Reconnect attempts after an unexpected close before giving up (default: 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt (default: 1000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Heartbeat interval in milliseconds (default: 30000). 0 = disabled.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Max time to wait for a heartbeat reply in milliseconds (default: 10000). 0 = never expire.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Max time for one connection attempt in milliseconds (default: 2000). 0 = no limit.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_command_endpoint() -> EndpointConfig {
    EndpointConfig::new(DEFAULT_COMMAND_URL)
}

fn default_session_endpoint() -> EndpointConfig {
    EndpointConfig::new(DEFAULT_SESSION_URL)
}

impl EndpointConfig {
    /// Endpoint at `url` with default timings.
    pub fn new(url: impl Into<String>) -> Self {
        EndpointConfig {
            url: url.into(),
            request_timeout_ms: default_request_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns an error message if the URL is not a WebSocket URL.
    pub fn validate_url(&self) -> Option<String> {
        if self.url.starts_with("ws://") || self.url.starts_with("wss://") {
            None
        } else {
            Some(format!(
                "invalid endpoint URL '{}': must be ws:// or wss://",
                self.url
            ))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            command: default_command_endpoint(),
            session: default_session_endpoint(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(Error::Config(format!("failed to read config: {}", e))),
        };
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `path` if given, otherwise from the default location.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) => Self::load(&path),
                None => Ok(Config::default()),
            },
        }
    }

    /// Checks both endpoint URLs.
    pub fn validate(&self) -> Result<()> {
        for endpoint in [&self.command, &self.session] {
            if let Some(message) = endpoint.validate_url() {
                return Err(Error::Config(message));
            }
        }
        Ok(())
    }

    /// Serializes the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))
    }

    /// Saves configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

/// Default config file location, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
