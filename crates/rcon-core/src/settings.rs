//! Settings file: server table plus reconnect and chat tuning.
//!
//! ```toml
//! [reconnect]
//! max_attempts = 3
//! interval_secs = 5.0
//!
//! [chat]
//! poll_interval_secs = 1.0
//! page_length = 2000
//!
//! [servers.main]
//! host = "203.0.113.7"
//! port = 27015
//! password = "secret"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::DEFAULT_PAGE_LENGTH;
use crate::error::{DomainError, DomainResult};
use crate::server::{ServerConfig, ServerDirectory};

/// Reconnection policy applied to channels connected with auto-reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Consecutive failed attempts before the channel is dropped
    pub max_attempts: u32,
    /// Fixed wait between attempts
    #[serde(rename = "interval_secs", with = "crate::server::duration_secs")]
    pub interval: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(5),
        }
    }
}

/// Chat bridge polling behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    #[serde(rename = "poll_interval_secs", with = "crate::server::duration_secs")]
    pub poll_interval: Duration,
    pub page_length: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            page_length: DEFAULT_PAGE_LENGTH,
        }
    }
}

/// Contents of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl Settings {
    /// Parses settings from TOML text.
    pub fn from_toml_str(text: &str) -> DomainResult<Self> {
        let settings: Settings = toml::from_str(text).map_err(|e| DomainError::ParseError {
            field: "settings".to_string(),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> DomainResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Settings file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|e| DomainError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let settings = Self::from_toml_str(&text)?;

        debug!(
            path = %path.display(),
            servers = settings.servers.len(),
            "Loaded settings"
        );
        Ok(settings)
    }

    /// Looks up a server, failing with `UnknownServer`.
    pub fn require_server(&self, name: &str) -> DomainResult<ServerConfig> {
        self.server(name).ok_or_else(|| DomainError::UnknownServer {
            name: name.to_string(),
        })
    }

    fn validate(&self) -> DomainResult<()> {
        if self.chat.page_length == 0 {
            return Err(DomainError::InvalidFieldValue {
                field: "chat.page_length".to_string(),
                value: "0".to_string(),
                expected: "a positive number".to_string(),
            });
        }
        if self.chat.poll_interval.is_zero() {
            return Err(DomainError::InvalidFieldValue {
                field: "chat.poll_interval_secs".to_string(),
                value: "0".to_string(),
                expected: "a positive duration".to_string(),
            });
        }
        for (name, server) in &self.servers {
            if server.host.is_empty() {
                return Err(DomainError::InvalidFieldValue {
                    field: format!("servers.{name}.host"),
                    value: String::new(),
                    expected: "a host name or address".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl ServerDirectory for Settings {
    fn server(&self, name: &str) -> Option<ServerConfig> {
        self.servers.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }
}
