//! Realtime connection state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^              |             |
//!      +--- backoff --+-- failure --+
//!      |
//!      +-- attempts > max_retries --> Failed (terminal)
//! ```
//!
//! [`ConnectionTracker`] holds no timers; callers sleep for the delay it returns.

use std::fmt;
use std::time::Duration;
use wpq_common::config::ClientConfig;

/// Message surfaced once retries are exhausted
pub const CONNECTION_LOST: &str = "connection lost, please reload";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; no further reconnects are attempted
    Failed(String),
}

impl ConnectionState {
    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Failed attempts tolerated before giving up
    pub max_retries: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max,
            max_retries,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.max_retries,
        )
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Connection state plus the consecutive-failure counter
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    policy: BackoffPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl ConnectionTracker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Consecutive failures since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Disconnected -> Connecting; returns false once failed
    pub fn begin_connect(&mut self) -> bool {
        if self.state.is_failed() {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Connecting -> Connected; resets the failure counter
    pub fn connected(&mut self) {
        if self.state.is_failed() {
            return;
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
    }

    /// A connect attempt failed or a live connection dropped
    pub fn record_failure(&mut self) -> RetryDecision {
        if self.state.is_failed() {
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        if self.attempts > self.policy.max_retries {
            self.state = ConnectionState::Failed(CONNECTION_LOST.to_string());
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.state = ConnectionState::Disconnected;
        RetryDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        }
    }
}
