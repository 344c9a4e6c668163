//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for binding
//! channels to servers, running commands, and subscribing to session events.
//! Socket work (connect, handshake, execute, reconnect) runs in the caller's
//! task, never in the actor, so a slow server only blocks its own channel.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RconError::ChannelClosed`

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use rcon_core::{ChannelId, ChatBinding, ChatMessage, ChatSettings, ServerConfig, SessionInfo};

use super::actor::{ChatTask, SessionLease};
use super::commands::{RegistryCommand, RemovalReason, SessionEvent};
use super::reconnect::ReconnectError;
use crate::chat::{ChannelSink, ChatBridge};
use crate::connection::Connection;
use crate::error::RconError;

/// Queue depth for locally authored chat awaiting relay.
const CHAT_OUTBOX_BUFFER: usize = 32;

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
///
/// # Usage
///
/// ```ignore
/// let handle = spawn_registry(RegistryConfig::default());
/// handle.connect(ChannelId::new("ops"), config, true).await?;
/// let status = handle.execute(&ChannelId::new("ops"), "status").await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<SessionEvent>,

    chat_settings: ChatSettings,
}

impl RegistryHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
        chat_settings: ChatSettings,
    ) -> Self {
        Self {
            sender,
            event_sender,
            chat_settings,
        }
    }

    /// Sends a command and waits for its reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RconError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RconError::ChannelClosed)?;

        rx.await.map_err(|_| RconError::ChannelClosed)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects and authenticates, then binds `channel_id` to the connection.
    ///
    /// # Errors
    ///
    /// - `RconError::ChannelBusy` if the channel is bound or already connecting
    /// - `RconError::Connect` / `RconError::Authentication` from the handshake;
    ///   nothing is stored in that case
    /// - `RconError::ChannelClosed` if the actor has shut down
    pub async fn connect(
        &self,
        channel_id: ChannelId,
        config: ServerConfig,
        auto_reconnect: bool,
    ) -> Result<(), RconError> {
        let claim = channel_id.clone();
        self.request(|respond_to| RegistryCommand::Reserve {
            channel_id: claim,
            respond_to,
        })
        .await??;

        let mut reservation = Reservation::new(self.sender.clone(), channel_id.clone());

        let connection = Connection::open(config.clone()).await.map_err(|e| {
            warn!(channel = %channel_id, error = %e, "Connect failed");
            e
        })?;

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::Publish {
                channel_id,
                config,
                connection: Box::new(connection),
                auto_reconnect,
                respond_to: tx,
            })
            .await
            .map_err(|_| RconError::ChannelClosed)?;
        reservation.disarm();

        rx.await.map_err(|_| RconError::ChannelClosed)?.map(|_| ())
    }

    /// Closes and removes the channel's entry.
    ///
    /// Any in-flight execute is aborted and the chat poller has finished by
    /// the time this returns.
    ///
    /// # Errors
    ///
    /// - `RconError::NoActiveConnection` if the channel is not bound
    pub async fn disconnect(&self, channel_id: &ChannelId) -> Result<(), RconError> {
        let target = channel_id.clone();
        let removed = self
            .request(|respond_to| RegistryCommand::Remove {
                channel_id: target,
                entry_id: None,
                reason: RemovalReason::Explicit,
                respond_to,
            })
            .await?;

        let session = removed.ok_or_else(|| RconError::NoActiveConnection(channel_id.clone()))?;
        session.teardown().await;
        Ok(())
    }

    /// Removes every entry and stops the actor.
    pub async fn shutdown(&self) -> Result<(), RconError> {
        let sessions = self
            .request(|respond_to| RegistryCommand::Shutdown { respond_to })
            .await?;

        for session in sessions {
            session.teardown().await;
        }
        info!("Registry shut down");
        Ok(())
    }

    // ========================================================================
    // Command Execution
    // ========================================================================

    /// Runs `command` on the channel's connection.
    ///
    /// Concurrent callers on one channel are served one at a time. On a
    /// network failure the reconnection policy runs before the error is
    /// returned; the command itself is not retried. Fatal protocol errors
    /// remove the entry.
    ///
    /// # Errors
    ///
    /// - `RconError::NoActiveConnection` if the channel is not bound, or was
    ///   disconnected while the command ran
    /// - any `Connection::execute` error
    pub async fn execute(&self, channel_id: &ChannelId, command: &str) -> Result<String, RconError> {
        let lease = self
            .lease(channel_id)
            .await?
            .ok_or_else(|| RconError::NoActiveConnection(channel_id.clone()))?;

        let outcome = tokio::select! {
            biased;
            _ = lease.cancel.cancelled() => None,
            result = self.execute_leased(&lease, command) => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => {
                debug!(channel = %channel_id, "Execute aborted by disconnect");
                Err(RconError::NoActiveConnection(channel_id.clone()))
            }
        }
    }

    async fn lease(&self, channel_id: &ChannelId) -> Result<Option<SessionLease>, RconError> {
        let target = channel_id.clone();
        self.request(|respond_to| RegistryCommand::Lease {
            channel_id: target,
            respond_to,
        })
        .await
    }

    /// Runs one command on the leased connection.
    ///
    /// The connection guard is held until any removal has been recorded, so a
    /// caller queued behind this one observes the cancelled entry instead of
    /// a closed connection and never starts a second reconnect round.
    async fn execute_leased(&self, lease: &SessionLease, command: &str) -> Result<String, RconError> {
        let mut connection = lease.connection.lock().await;
        if lease.cancel.is_cancelled() {
            return Err(RconError::NoActiveConnection(lease.channel_id.clone()));
        }

        let err = match connection.execute(command).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if err.is_fatal() {
            warn!(channel = %lease.channel_id, error = %err, "Protocol failure, dropping channel");
            self.remove_entry(lease, RemovalReason::ProtocolError).await;
            return Err(err);
        }

        if !err.is_network() {
            return Err(err);
        }

        if !lease.policy.is_active() {
            warn!(channel = %lease.channel_id, error = %err, "Connection lost");
            self.remove_entry(lease, RemovalReason::ConnectionLost).await;
            return Err(err);
        }

        warn!(
            channel = %lease.channel_id,
            error = %err,
            max_attempts = lease.policy.max_attempts,
            "Connection lost, reconnecting"
        );

        let outcome = lease
            .policy
            .run(
                || Connection::open(lease.config.clone()),
                |attempt| self.report_attempt(lease, attempt),
                &lease.cancel,
            )
            .await;

        match outcome {
            Ok(fresh) => *connection = fresh,
            Err(ReconnectError::Exhausted { attempts, last_error }) => {
                warn!(
                    channel = %lease.channel_id,
                    attempts,
                    last_error = %last_error,
                    "Reconnection exhausted"
                );
                self.remove_entry(lease, RemovalReason::ReconnectExhausted).await;
            }
            Err(ReconnectError::Cancelled) => {}
        }
        drop(connection);

        Err(err)
    }

    fn report_attempt(&self, lease: &SessionLease, attempt: u32) {
        lease.reconnect_attempts.store(attempt, Ordering::Relaxed);
        let _ = self.event_sender.send(SessionEvent::ReconnectAttempt {
            channel_id: lease.channel_id.clone(),
            attempt,
        });
    }

    /// Removes the leased generation and stops its tasks in the background.
    ///
    /// Teardown is detached because the caller may be the entry's own chat
    /// poller, and may still hold the connection guard.
    async fn remove_entry(&self, lease: &SessionLease, reason: RemovalReason) {
        let removed = self
            .request(|respond_to| RegistryCommand::Remove {
                channel_id: lease.channel_id.clone(),
                entry_id: Some(lease.entry_id),
                reason,
                respond_to,
            })
            .await;

        match removed {
            Ok(Some(session)) => {
                tokio::spawn(session.teardown());
            }
            Ok(None) => debug!(channel = %lease.channel_id, "Entry already replaced or removed"),
            Err(e) => debug!(channel = %lease.channel_id, error = %e, "Could not remove entry"),
        }
    }

    // ========================================================================
    // Chat Bridge
    // ========================================================================

    /// Starts relaying chat between the channel and its server.
    ///
    /// Replaces a running bridge on the same channel.
    ///
    /// # Errors
    ///
    /// - `RconError::NoActiveConnection` if the channel is not bound
    pub async fn enable_chat(
        &self,
        channel_id: &ChannelId,
        binding: ChatBinding,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<(), RconError> {
        let lease = self
            .lease(channel_id)
            .await?
            .ok_or_else(|| RconError::NoActiveConnection(channel_id.clone()))?;

        let (outgoing, outbox) = mpsc::channel(CHAT_OUTBOX_BUFFER);
        let cancel = lease.cancel.child_token();
        let bridge = ChatBridge::new(
            self.clone(),
            channel_id.clone(),
            binding,
            sink,
            &self.chat_settings,
            outbox,
            cancel.clone(),
        );
        let chat = ChatTask {
            outgoing,
            cancel,
            task: tokio::spawn(bridge.run()),
        };

        let target = channel_id.clone();
        let attached = self
            .request(|respond_to| RegistryCommand::AttachChat {
                channel_id: target,
                entry_id: lease.entry_id,
                chat,
                respond_to,
            })
            .await?;

        match attached {
            Ok(Some(previous)) => {
                previous.stop().await;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err((e, chat)) => {
                chat.stop().await;
                Err(e)
            }
        }
    }

    /// Stops the channel's chat bridge and waits for it to finish.
    ///
    /// # Errors
    ///
    /// - `RconError::NoActiveConnection` if the channel is not bound
    /// - `RconError::ChatNotEnabled` if no bridge is running
    pub async fn disable_chat(&self, channel_id: &ChannelId) -> Result<(), RconError> {
        let target = channel_id.clone();
        let chat = self
            .request(|respond_to| RegistryCommand::DetachChat {
                channel_id: target,
                respond_to,
            })
            .await??;
        chat.stop().await;
        Ok(())
    }

    /// Queues a locally authored chat line for relay to the server.
    ///
    /// # Errors
    ///
    /// - `RconError::NoActiveConnection` if the channel is not bound
    /// - `RconError::ChatNotEnabled` if no bridge is running
    pub async fn post_chat(
        &self,
        channel_id: &ChannelId,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), RconError> {
        let target = channel_id.clone();
        let outbox = self
            .request(|respond_to| RegistryCommand::ChatOutbox {
                channel_id: target,
                respond_to,
            })
            .await??;

        outbox
            .send(ChatMessage::new(author, text))
            .await
            .map_err(|_| RconError::ChatNotEnabled(channel_id.clone()))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of every bound channel, sorted by channel id.
    ///
    /// Returns an empty vector if the actor has shut down.
    pub async fn channels(&self) -> Vec<SessionInfo> {
        self.request(|respond_to| RegistryCommand::List { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Subscribe to session events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    /// Returns `true` while the actor accepts commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Claim on a channel while its connection is being opened.
///
/// Dropped without `disarm()` (failed handshake, cancelled caller) it
/// releases the claim so the channel can be connected again.
struct Reservation {
    sender: mpsc::Sender<RegistryCommand>,
    channel_id: ChannelId,
    armed: bool,
}

impl Reservation {
    fn new(sender: mpsc::Sender<RegistryCommand>, channel_id: ChannelId) -> Self {
        Self {
            sender,
            channel_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let release = RegistryCommand::Release {
            channel_id: self.channel_id.clone(),
        };
        if let Err(mpsc::error::TrySendError::Full(release)) = self.sender.try_send(release) {
            let sender = self.sender.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = sender.send(release).await;
                });
            }
        }
    }
}
