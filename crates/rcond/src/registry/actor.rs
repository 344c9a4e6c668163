//! Registry actor - owns the channel map and processes commands.
//!
//! The RegistryActor is the single owner of the channel → session map.
//! It receives commands via an mpsc channel and publishes events via broadcast.
//! Socket I/O never happens here: connections are opened by the handle and
//! published once authenticated, and executes run on leased handles.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rcon_core::{ChannelId, ChatMessage, ReconnectSettings, ServerConfig, SessionInfo};

use super::commands::{RegistryCommand, RemovalReason, SessionEvent};
use super::reconnect::ReconnectPolicy;
use crate::connection::Connection;
use crate::error::RconError;

/// A connection shared between the entry and in-flight executes.
///
/// The mutex serializes callers: `execute()` holds the guard for a whole request.
pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

// ============================================================================
// Entry State
// ============================================================================

/// A running chat poller attached to an entry.
pub(crate) struct ChatTask {
    pub outgoing: mpsc::Sender<ChatMessage>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl ChatTask {
    /// Cancels the poller and waits for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Chat poller terminated abnormally");
        }
    }
}

/// One registry entry.
pub(crate) struct Session {
    /// Generation id, unique per registry.
    pub entry_id: u64,
    pub channel_id: ChannelId,
    pub config: ServerConfig,
    pub connection: SharedConnection,
    pub policy: ReconnectPolicy,
    pub reconnect_attempts: Arc<AtomicU32>,
    /// Cancelled on removal; the chat poller holds a child token.
    pub cancel: CancellationToken,
    pub chat: Option<ChatTask>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    fn lease(&self) -> SessionLease {
        SessionLease {
            entry_id: self.entry_id,
            channel_id: self.channel_id.clone(),
            config: self.config.clone(),
            connection: Arc::clone(&self.connection),
            policy: self.policy,
            reconnect_attempts: Arc::clone(&self.reconnect_attempts),
            cancel: self.cancel.clone(),
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            channel_id: self.channel_id.clone(),
            address: self.config.address(),
            connected_at: self.connected_at,
            chat_enabled: self.chat.is_some(),
            auto_reconnect: self.policy.enabled,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    /// Stops everything the entry owns: in-flight executes, the chat poller, the socket.
    ///
    /// Must not be awaited from inside the entry's own chat poller.
    pub async fn teardown(self) {
        self.cancel.cancel();
        if let Some(chat) = self.chat {
            chat.stop().await;
        }
        self.connection.lock().await.close();
        debug!(channel = %self.channel_id, "Session torn down");
    }
}

/// Shared handles to one entry, valid for the duration of one operation.
#[derive(Clone)]
pub(crate) struct SessionLease {
    pub entry_id: u64,
    pub channel_id: ChannelId,
    pub config: ServerConfig,
    pub connection: SharedConnection,
    pub policy: ReconnectPolicy,
    pub reconnect_attempts: Arc<AtomicU32>,
    pub cancel: CancellationToken,
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all channel state.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes events to subscribers.
///
/// # Ownership
///
/// - `sessions`: at most one entry per channel
/// - `pending`: channels with a connect in progress
///
/// A channel is never in both maps at once.
pub(crate) struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    sessions: HashMap<ChannelId, Session>,
    pending: HashSet<ChannelId>,
    next_entry_id: u64,
    reconnect: ReconnectSettings,
    event_publisher: broadcast::Sender<SessionEvent>,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<SessionEvent>,
        reconnect: ReconnectSettings,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            pending: HashSet::new(),
            next_entry_id: 0,
            reconnect,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until `Shutdown` or until every sender is dropped.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            if !self.handle_command(cmd) {
                break;
            }
        }

        // Entries still present when the last handle goes away: stop their tasks.
        for session in self.sessions.values() {
            session.cancel.cancel();
        }

        info!(sessions = self.sessions.len(), "Registry actor stopped");
    }

    /// Dispatches a command. Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: RegistryCommand) -> bool {
        match cmd {
            RegistryCommand::Reserve {
                channel_id,
                respond_to,
            } => {
                let result = self.handle_reserve(channel_id);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Release { channel_id } => {
                if self.pending.remove(&channel_id) {
                    debug!(channel = %channel_id, "Connect reservation released");
                }
            }
            RegistryCommand::Publish {
                channel_id,
                config,
                connection,
                auto_reconnect,
                respond_to,
            } => {
                let result = self.handle_publish(channel_id, config, *connection, auto_reconnect);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Lease {
                channel_id,
                respond_to,
            } => {
                let lease = self.sessions.get(&channel_id).map(Session::lease);
                let _ = respond_to.send(lease);
            }
            RegistryCommand::Remove {
                channel_id,
                entry_id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_remove(&channel_id, entry_id, reason);
                if let Err(Some(session)) = respond_to.send(removed) {
                    // Caller gone; nobody else will stop the entry's tasks.
                    session.cancel.cancel();
                    tokio::spawn(session.teardown());
                }
            }
            RegistryCommand::AttachChat {
                channel_id,
                entry_id,
                chat,
                respond_to,
            } => {
                let result = self.handle_attach_chat(&channel_id, entry_id, chat);
                if let Err(Err((_, chat))) = respond_to.send(result) {
                    chat.cancel.cancel();
                }
            }
            RegistryCommand::DetachChat {
                channel_id,
                respond_to,
            } => {
                let result = self.handle_detach_chat(&channel_id);
                if let Err(Ok(chat)) = respond_to.send(result) {
                    chat.cancel.cancel();
                }
            }
            RegistryCommand::ChatOutbox {
                channel_id,
                respond_to,
            } => {
                let result = match self.sessions.get(&channel_id) {
                    None => Err(RconError::NoActiveConnection(channel_id)),
                    Some(Session { chat: None, .. }) => Err(RconError::ChatNotEnabled(channel_id)),
                    Some(Session {
                        chat: Some(chat), ..
                    }) => Ok(chat.outgoing.clone()),
                };
                let _ = respond_to.send(result);
            }
            RegistryCommand::List { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            RegistryCommand::Shutdown { respond_to } => {
                let removed = self.handle_shutdown();
                if let Err(sessions) = respond_to.send(removed) {
                    for session in sessions {
                        tokio::spawn(session.teardown());
                    }
                }
                return false;
            }
        }
        true
    }

    fn handle_reserve(&mut self, channel_id: ChannelId) -> Result<(), RconError> {
        if self.sessions.contains_key(&channel_id) || self.pending.contains(&channel_id) {
            return Err(RconError::ChannelBusy(channel_id));
        }
        debug!(channel = %channel_id, "Channel reserved for connect");
        self.pending.insert(channel_id);
        Ok(())
    }

    fn handle_publish(
        &mut self,
        channel_id: ChannelId,
        config: ServerConfig,
        connection: Connection,
        auto_reconnect: bool,
    ) -> Result<u64, RconError> {
        self.pending.remove(&channel_id);
        if self.sessions.contains_key(&channel_id) {
            return Err(RconError::ChannelBusy(channel_id));
        }

        self.next_entry_id = self.next_entry_id.wrapping_add(1);
        let entry_id = self.next_entry_id;
        let address = config.address();

        let session = Session {
            entry_id,
            channel_id: channel_id.clone(),
            config,
            connection: Arc::new(Mutex::new(connection)),
            policy: ReconnectPolicy::from_settings(auto_reconnect, &self.reconnect),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            cancel: CancellationToken::new(),
            chat: None,
            connected_at: Utc::now(),
        };
        self.sessions.insert(channel_id.clone(), session);

        info!(
            channel = %channel_id,
            address = %address,
            auto_reconnect,
            total_sessions = self.sessions.len(),
            "Channel connected"
        );

        let _ = self.event_publisher.send(SessionEvent::Connected {
            channel_id,
            address,
        });

        Ok(entry_id)
    }

    fn handle_remove(
        &mut self,
        channel_id: &ChannelId,
        entry_id: Option<u64>,
        reason: RemovalReason,
    ) -> Option<Session> {
        let matches = match (self.sessions.get(channel_id), entry_id) {
            (Some(session), Some(id)) => session.entry_id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }

        let session = self.sessions.remove(channel_id)?;
        session.cancel.cancel();

        info!(
            channel = %channel_id,
            reason = %reason,
            remaining_sessions = self.sessions.len(),
            "Channel removed"
        );

        let _ = self.event_publisher.send(SessionEvent::Removed {
            channel_id: channel_id.clone(),
            reason,
        });

        Some(session)
    }

    fn handle_attach_chat(
        &mut self,
        channel_id: &ChannelId,
        entry_id: u64,
        chat: ChatTask,
    ) -> Result<Option<ChatTask>, (RconError, ChatTask)> {
        let Some(session) = self
            .sessions
            .get_mut(channel_id)
            .filter(|session| session.entry_id == entry_id)
        else {
            return Err((RconError::NoActiveConnection(channel_id.clone()), chat));
        };

        let previous = session.chat.replace(chat);
        info!(channel = %channel_id, replaced = previous.is_some(), "Chat bridge enabled");

        let _ = self.event_publisher.send(SessionEvent::ChatEnabled {
            channel_id: channel_id.clone(),
        });
        Ok(previous)
    }

    fn handle_detach_chat(&mut self, channel_id: &ChannelId) -> Result<ChatTask, RconError> {
        let session = self
            .sessions
            .get_mut(channel_id)
            .ok_or_else(|| RconError::NoActiveConnection(channel_id.clone()))?;
        let chat = session
            .chat
            .take()
            .ok_or_else(|| RconError::ChatNotEnabled(channel_id.clone()))?;

        info!(channel = %channel_id, "Chat bridge disabled");
        let _ = self.event_publisher.send(SessionEvent::ChatDisabled {
            channel_id: channel_id.clone(),
        });
        Ok(chat)
    }

    fn handle_list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.values().map(Session::info).collect();
        infos.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        infos
    }

    fn handle_shutdown(&mut self) -> Vec<Session> {
        self.pending.clear();
        let channels: Vec<ChannelId> = self.sessions.keys().cloned().collect();
        let removed: Vec<Session> = channels
            .iter()
            .filter_map(|channel_id| self.handle_remove(channel_id, None, RemovalReason::Shutdown))
            .collect();
        info!(removed = removed.len(), "Registry shutting down");
        removed
    }

    /// Returns the number of bound channels.
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
