//! Registry actor commands and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `SessionEvent`: Events published by the registry for subscribers
//! - `RemovalReason`: Why an entry left the registry

use std::fmt;

use rcon_core::{ChannelId, ChatMessage, ServerConfig, SessionInfo};
use tokio::sync::{mpsc, oneshot};

use super::actor::{ChatTask, Session, SessionLease};
use crate::connection::Connection;
use crate::error::RconError;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Connecting is split in three steps so the handshake runs outside the actor:
/// `Reserve` claims the channel, the caller opens the connection, then
/// `Publish` stores it (or `Release` gives the claim back).
pub(crate) enum RegistryCommand {
    /// Claim `channel_id` for a connect in progress.
    ///
    /// # Errors
    /// - `RconError::ChannelBusy` if an entry or another claim exists
    Reserve {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<Result<(), RconError>>,
    },

    /// Drop a claim after a failed connect. Fire-and-forget.
    Release { channel_id: ChannelId },

    /// Store an authenticated connection under a claimed channel.
    ///
    /// Responds with the new entry's generation id.
    Publish {
        channel_id: ChannelId,
        config: ServerConfig,
        connection: Box<Connection>,
        auto_reconnect: bool,
        respond_to: oneshot::Sender<Result<u64, RconError>>,
    },

    /// Borrow shared handles to an entry for one operation.
    Lease {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<Option<SessionLease>>,
    },

    /// Remove an entry.
    ///
    /// With `entry_id` set, only that generation is removed, so a stale
    /// lease cannot tear down a newer entry on the same channel.
    Remove {
        channel_id: ChannelId,
        entry_id: Option<u64>,
        reason: RemovalReason,
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Install a running chat poller on an entry.
    ///
    /// On error the task is handed back so the caller can stop it.
    AttachChat {
        channel_id: ChannelId,
        entry_id: u64,
        chat: ChatTask,
        respond_to: oneshot::Sender<Result<Option<ChatTask>, (RconError, ChatTask)>>,
    },

    /// Take the chat poller off an entry.
    DetachChat {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<Result<ChatTask, RconError>>,
    },

    /// Get the outgoing chat queue of an entry.
    ChatOutbox {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<Result<mpsc::Sender<ChatMessage>, RconError>>,
    },

    /// Snapshot of all entries.
    List {
        respond_to: oneshot::Sender<Vec<SessionInfo>>,
    },

    /// Remove every entry and stop the actor.
    Shutdown {
        respond_to: oneshot::Sender<Vec<Session>>,
    },
}

// ============================================================================
// Session Events
// ============================================================================

/// Events published by the registry to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A channel was bound to a server.
    Connected {
        channel_id: ChannelId,
        address: String,
    },

    /// Reconnection status: the attempt about to run, or `0` once reconnected.
    ReconnectAttempt { channel_id: ChannelId, attempt: u32 },

    /// A chat poller started on the channel.
    ChatEnabled { channel_id: ChannelId },

    /// The channel's chat poller was stopped.
    ChatDisabled { channel_id: ChannelId },

    /// An entry was removed from the registry.
    Removed {
        channel_id: ChannelId,
        reason: RemovalReason,
    },
}

/// Reason why an entry was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Client explicitly disconnected the channel.
    Explicit,

    /// The connection dropped and auto-reconnect was off.
    ConnectionLost,

    /// Every reconnection attempt failed.
    ReconnectExhausted,

    /// The server violated the protocol or rejected the credentials.
    ProtocolError,

    /// The registry was shut down.
    Shutdown,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicitly disconnected"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::ReconnectExhausted => write!(f, "reconnection attempts exhausted"),
            Self::ProtocolError => write!(f, "unrecoverable protocol error"),
            Self::Shutdown => write!(f, "registry shut down"),
        }
    }
}
