//! Live chat bridge between a channel and its remote server.
//!
//! One `ChatBridge` task runs per channel with chat enabled. It polls the
//! server's receive command on a fixed interval and relays any new text to
//! the channel through a [`ChannelSink`]. Messages posted to the channel are
//! forwarded with the send command, followed by an immediate poll.
//!
//! The task holds a child of its entry's cancellation token and stops when
//! the entry is removed, when chat is disabled, or when the registry stops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use rcon_core::{paginate, ChannelId, ChatBinding, ChatMessage, ChatSettings};

use crate::error::RconError;
use crate::registry::RegistryHandle;

/// Where relayed server chat is published.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Publishes one page of text to `channel_id`.
    async fn emit(&self, channel_id: &ChannelId, text: &str);
}

#[async_trait]
impl ChannelSink for mpsc::UnboundedSender<(ChannelId, String)> {
    async fn emit(&self, channel_id: &ChannelId, text: &str) {
        if self.send((channel_id.clone(), text.to_string())).is_err() {
            debug!(channel = %channel_id, "Chat sink receiver dropped");
        }
    }
}

/// Polling task for one channel.
pub(crate) struct ChatBridge {
    registry: RegistryHandle,
    channel_id: ChannelId,
    binding: ChatBinding,
    sink: Arc<dyn ChannelSink>,
    poll_interval: Duration,
    page_length: usize,
    outgoing: mpsc::Receiver<ChatMessage>,
    cancel: CancellationToken,
}

impl ChatBridge {
    pub fn new(
        registry: RegistryHandle,
        channel_id: ChannelId,
        binding: ChatBinding,
        sink: Arc<dyn ChannelSink>,
        settings: &ChatSettings,
        outgoing: mpsc::Receiver<ChatMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            channel_id,
            binding,
            sink,
            poll_interval: settings.poll_interval,
            page_length: settings.page_length,
            outgoing,
            cancel,
        }
    }

    /// Runs until cancelled or until the channel's entry disappears.
    pub async fn run(mut self) {
        info!(
            channel = %self.channel_id,
            receive = %self.binding.receive_command,
            send = %self.binding.send_command,
            "Chat bridge started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let keep_going = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                Some(message) = self.outgoing.recv() => {
                    self.forward(message).await && self.poll().await
                }
                _ = ticker.tick() => self.poll().await,
            };
            if !keep_going {
                break;
            }
        }

        info!(channel = %self.channel_id, "Chat bridge stopped");
    }

    /// Sends a locally authored message to the server.
    async fn forward(&self, message: ChatMessage) -> bool {
        let line = self.binding.send_line(&message);
        trace!(channel = %self.channel_id, line = %line, "Forwarding chat");

        match self.registry.execute(&self.channel_id, &line).await {
            Ok(_) => true,
            Err(e) => self.keep_going_after(e),
        }
    }

    /// Fetches new server chat and relays it.
    async fn poll(&self) -> bool {
        let response = match self
            .registry
            .execute(&self.channel_id, &self.binding.receive_command)
            .await
        {
            Ok(response) => response,
            Err(e) => return self.keep_going_after(e),
        };

        if self.binding.is_silent(&response) {
            return true;
        }

        for page in paginate(response.trim(), self.page_length) {
            if self.cancel.is_cancelled() {
                return false;
            }
            self.sink.emit(&self.channel_id, &page).await;
        }
        true
    }

    fn keep_going_after(&self, err: RconError) -> bool {
        match err {
            RconError::NoActiveConnection(_) | RconError::ChannelClosed => {
                debug!(channel = %self.channel_id, "Chat bridge entry gone");
                false
            }
            other => {
                warn!(channel = %self.channel_id, error = %other, "Chat bridge command failed");
                true
            }
        }
    }
}
