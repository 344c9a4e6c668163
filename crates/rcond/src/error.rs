//! Error taxonomy for connections and the session registry.
//!
//! Every variant carries owned strings rather than source errors so results
//! can travel through oneshot channels and be cloned into events.

use rcon_core::ChannelId;
use rcon_protocol::CodecError;
use thiserror::Error;

/// Errors surfaced by [`Connection`](crate::connection::Connection) and
/// [`RegistryHandle`](crate::registry::RegistryHandle).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RconError {
    /// Socket connect failed: refused, timed out, or the host did not resolve.
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// Bad credentials or a malformed reply to the login request.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Outgoing body exceeds the protocol's command length ceiling.
    #[error("command too large to send: {len} bytes (max: {max})")]
    CommandTooLarge { len: usize, max: usize },

    /// Command cannot be framed (embedded NUL byte).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// `execute()` was called before a successful handshake.
    #[error("connection is not authenticated")]
    NotAuthenticated,

    /// The peer sent a frame that violates the packet format.
    #[error("protocol framing error: {0}")]
    ProtocolFraming(String),

    /// A reply carried a request id other than the outstanding one.
    #[error("request id mismatch: got {got}, expected {expected}")]
    ProtocolDesync { got: i32, expected: i32 },

    /// Read/write failure, peer closed the socket, or a read timed out.
    #[error("network error: {0}")]
    Network(String),

    /// `connect()` on a channel that already has (or is opening) a session.
    #[error("channel {0} already has an active connection")]
    ChannelBusy(ChannelId),

    /// Operation on a channel without a session.
    #[error("no active connection in channel {0}")]
    NoActiveConnection(ChannelId),

    /// Chat relay requested on a channel without a chat bridge.
    #[error("live chat is not enabled in channel {0}")]
    ChatNotEnabled(ChannelId),

    /// The registry actor has shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

impl RconError {
    /// Returns true for failures the reconnection policy may recover from.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns true for protocol failures that make a connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::ProtocolFraming(_) | Self::ProtocolDesync { .. }
        )
    }

    /// Returns true if the socket must be closed after this error.
    pub fn invalidates_connection(&self) -> bool {
        self.is_network() || self.is_fatal()
    }

    pub(crate) fn network(err: impl std::fmt::Display) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<CodecError> for RconError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::CommandTooLarge { len, max } => Self::CommandTooLarge { len, max },
            CodecError::EmbeddedNul => {
                Self::InvalidCommand("command contains an embedded NUL byte".to_string())
            }
            CodecError::Io(e) => Self::Network(e.to_string()),
            other => Self::ProtocolFraming(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RconError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}
