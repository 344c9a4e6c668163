//! Bounded reconnection policy.
//!
//! Retries a connect operation a fixed number of times with a fixed wait
//! between attempts. The attempt number is reported before each try and `0`
//! is reported once a try succeeds. The policy never retries indefinitely.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rcon_core::ReconnectSettings;

use crate::error::RconError;

/// Why a reconnection run gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconnectError {
    #[error("reconnection failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: RconError,
    },

    #[error("reconnection cancelled")]
    Cancelled,
}

/// Per-entry reconnection behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl ReconnectPolicy {
    /// Policy for an entry; `enabled` comes from the channel's auto-reconnect flag.
    pub fn from_settings(enabled: bool, settings: &ReconnectSettings) -> Self {
        Self {
            enabled,
            max_attempts: settings.max_attempts,
            interval: settings.interval,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            interval: Duration::ZERO,
        }
    }

    /// Returns true if a lost connection should be retried at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.max_attempts > 0
    }

    /// Runs `connect` until it succeeds, the budget is spent, or `cancel` fires.
    ///
    /// `on_attempt` receives `1..=max_attempts` before each try and `0` after
    /// a success.
    pub async fn run<T, F, Fut>(
        &self,
        mut connect: F,
        mut on_attempt: impl FnMut(u32),
        cancel: &CancellationToken,
    ) -> Result<T, ReconnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RconError>>,
    {
        let mut last_error = RconError::Network("reconnection disabled".to_string());

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = sleep(self.interval) => {}
                    _ = cancel.cancelled() => {
                        debug!(attempt, "Reconnection cancelled while waiting");
                        return Err(ReconnectError::Cancelled);
                    }
                }
            }

            on_attempt(attempt);
            debug!(attempt, max_attempts = self.max_attempts, "Reconnection attempt");

            let result = tokio::select! {
                result = connect() => result,
                _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            };

            match result {
                Ok(value) => {
                    info!(attempt, "Reconnected");
                    on_attempt(0);
                    return Ok(value);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnection attempt failed");
                    last_error = e;
                }
            }
        }

        Err(ReconnectError::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
