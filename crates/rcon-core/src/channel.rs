//! Channel identifiers and session views.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a logical channel that owns at most one RCON session.
///
/// Opaque to the core: the hosting runtime decides what a channel is (a chat
/// room, a terminal, a test fixture).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Creates a new ChannelId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Read-only snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub channel_id: ChannelId,
    /// `host:port` of the remote server
    pub address: String,
    pub connected_at: DateTime<Utc>,
    /// Whether a chat bridge is running for this channel
    pub chat_enabled: bool,
    pub auto_reconnect: bool,
    /// Reconnect attempts made since the last successful connect
    pub reconnect_attempts: u32,
}

impl SessionInfo {
    /// Seconds since the channel was first bound.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.connected_at).num_seconds().max(0)
    }
}
