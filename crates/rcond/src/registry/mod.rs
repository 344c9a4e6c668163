//! Session registry using Actor pattern.
//!
//! The registry maps each channel to at most one authenticated connection.
//! It receives commands via a tokio mpsc channel and publishes lifecycle
//! events on a broadcast channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ RegistryHandle  │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   SessionEvent        │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!   connect / execute        HashMap<ChannelId,     reconnect status,
//!   run in caller task          Session>            removals, chat
//! ```
//!
//! Entries are created-then-published: the handshake completes before the
//! entry becomes visible. Removal cancels the entry's token first, which
//! aborts in-flight executes and stops the chat poller.
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

use rcon_core::{ChatSettings, ReconnectSettings, Settings};

mod actor;
mod commands;
mod handle;
mod reconnect;

pub use commands::{RemovalReason, SessionEvent};
pub use handle::RegistryHandle;
pub use reconnect::{ReconnectError, ReconnectPolicy};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Registry-wide tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegistryConfig {
    /// Applied to entries connected with auto-reconnect
    pub reconnect: ReconnectSettings,
    pub chat: ChatSettings,
}

impl From<&Settings> for RegistryConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            reconnect: settings.reconnect,
            chat: settings.chat,
        }
    }
}

/// Spawn the registry actor and return a handle for interaction.
///
/// Each call creates an independent registry.
///
/// # Example
///
/// ```no_run
/// use rcond::registry::{spawn_registry, RegistryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(RegistryConfig::default());
///     let channels = handle.channels().await;
///     assert!(channels.is_empty());
/// }
/// ```
pub fn spawn_registry(config: RegistryConfig) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = actor::RegistryActor::new(cmd_rx, event_tx.clone(), config.reconnect);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx, config.chat)
}
