//! Exponential backoff with a retry ceiling.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Backoff bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// Attempts scheduled since the last successful handshake
    pub attempts: u32,
    /// Delay of the most recent schedule, never above `max_delay_ms`.
    /// Saturates at `u32::MAX` (about 49 days).
    pub last_delay_ms: u32,
}

/// Outcome of [`ReconnectPolicy::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Arm a timer for `delay`; this is attempt number `attempt` (1-based)
    Retry {
        /// Attempt number
        attempt: u32,
        /// Backoff delay
        delay: Duration,
    },
    /// A reconnect is already pending; nothing to do
    AlreadyPending,
    /// Retries used up
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Decides when (and whether) to reconnect. Owns no timer.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    state: ReconnectState,
    pending: bool,
}

impl ReconnectPolicy {
    /// Policy for `config`
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ReconnectState::default(),
            pending: false,
        }
    }

    /// `min(base * 2^attempt, max)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let ms = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Request a reconnect after a disconnection
    pub fn schedule(&mut self) -> ReconnectDecision {
        if self.pending {
            return ReconnectDecision::AlreadyPending;
        }
        if self.state.attempts >= self.config.max_retries {
            return ReconnectDecision::Exhausted {
                attempts: self.state.attempts,
            };
        }

        let delay = self.delay(self.state.attempts);
        self.state.attempts += 1;
        self.state.last_delay_ms = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
        self.pending = true;
        ReconnectDecision::Retry {
            attempt: self.state.attempts,
            delay,
        }
    }

    /// The scheduled timer fired (or was cancelled)
    pub fn clear_pending(&mut self) {
        self.pending = false;
    }

    /// True while a scheduled reconnect has not fired
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Successful handshake, manual disconnect or a fresh `connect()`
    pub fn reset(&mut self) {
        self.state = ReconnectState::default();
        self.pending = false;
    }

    /// Current bookkeeping
    pub fn state(&self) -> ReconnectState {
        self.state
    }
}
