//! Remote server configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default RCON port of Source engine servers.
pub const DEFAULT_PORT: u16 = 27015;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How a multi-packet reply is told apart from a finished one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReassemblyMode {
    /// Exactly one reply packet per command.
    Single,
    /// Keep reading while bytes are buffered or the last packet was large.
    #[default]
    Heuristic,
    /// Follow each command with an empty request whose echo ends the reply.
    Sentinel,
}

impl fmt::Display for ReassemblyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Sentinel => write!(f, "sentinel"),
        }
    }
}

/// Connection parameters for one remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    /// Whether replies may span several packets
    #[serde(default = "default_true")]
    pub multi_packet: bool,
    /// Use the sentinel end marker instead of the timing heuristic
    #[serde(default)]
    pub sentinel: bool,
    /// Bound on connect and on every read
    #[serde(
        default = "default_timeout",
        rename = "timeout_secs",
        with = "duration_secs"
    )]
    pub timeout: Duration,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl ServerConfig {
    /// Creates a config with default port handling, multi-packet replies and a 5 s timeout.
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            multi_packet: true,
            sentinel: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ReassemblyMode) -> Self {
        self.multi_packet = mode != ReassemblyMode::Single;
        self.sentinel = mode == ReassemblyMode::Sentinel;
        self
    }

    /// Reassembly strategy selected by `multi_packet` and `sentinel`.
    pub fn reassembly_mode(&self) -> ReassemblyMode {
        match (self.multi_packet, self.sentinel) {
            (false, _) => ReassemblyMode::Single,
            (true, false) => ReassemblyMode::Heuristic,
            (true, true) => ReassemblyMode::Sentinel,
        }
    }

    /// `host:port`, suitable for display and for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read-only lookup of server configurations by name.
///
/// Storage is owned by whoever implements this; the core never writes to it.
pub trait ServerDirectory {
    /// Returns the configuration registered under `name`.
    fn server(&self, name: &str) -> Option<ServerConfig>;

    /// Returns all registered server names, sorted.
    fn names(&self) -> Vec<String>;
}

/// Serde helper storing a `Duration` as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassembly_mode_selection() {
        let mut config = ServerConfig::new("localhost", 27015, "pw");
        assert_eq!(config.reassembly_mode(), ReassemblyMode::Heuristic);

        config.sentinel = true;
        assert_eq!(config.reassembly_mode(), ReassemblyMode::Sentinel);

        config.multi_packet = false;
        assert_eq!(config.reassembly_mode(), ReassemblyMode::Single);
    }

    #[test]
    fn test_with_mode_round_trips() {
        for mode in [
            ReassemblyMode::Single,
            ReassemblyMode::Heuristic,
            ReassemblyMode::Sentinel,
        ] {
            let config = ServerConfig::new("h", 1, "").with_mode(mode);
            assert_eq!(config.reassembly_mode(), mode);
        }
    }

    #[test]
    fn test_address() {
        let config = ServerConfig::new("10.0.0.5", 25575, "pw");
        assert_eq!(config.address(), "10.0.0.5:25575");
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: ServerConfig = toml::from_str(r#"host = "example.org""#).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.password, "");
        assert!(config.multi_packet);
        assert!(!config.sentinel);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_deserialize_fractional_timeout() {
        let config: ServerConfig = toml::from_str(
            r#"
            host = "example.org"
            port = 27016
            password = "hunter2"
            multi_packet = false
            timeout_secs = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.reassembly_mode(), ReassemblyMode::Single);
    }

    #[test]
    fn test_deserialize_rejects_negative_timeout() {
        let result: Result<ServerConfig, _> = toml::from_str(
            r#"
            host = "example.org"
            timeout_secs = -1.0
            "#,
        );
        assert!(result.is_err());
    }
}
