use std::time::Duration;

use engage_protocol::{MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY_MS};

/// Bounded, constant-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            delay: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }
}

/// Retry bookkeeping for one channel client.
///
/// The counter resets on every successful open and grows by one per
/// abnormal close until it reaches `max_attempts`.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn on_abnormal_close(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay)
    }

    /// Spend the whole budget so nothing reconnects automatically.
    pub fn suppress(&mut self) {
        self.attempts = self.policy.max_attempts;
    }
}
