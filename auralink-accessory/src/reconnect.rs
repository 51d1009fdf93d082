//! Exponential backoff for the accessory's reconnect attempts.
//!
//! Grounded on `original_source/accessory/src/connection_fsm.cpp`'s
//! `attempt_reconnection`: each attempt sleeps the *current* delay,
//! then the delay for the next attempt is doubled and capped. A
//! successful `CONNECT_REQUEST` resets both the attempt counter and
//! the delay back to the base.

use std::time::Duration;

use auralink_protocol::types::{RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS};

pub struct ReconnectPolicy {
    attempts: u32,
    delay_ms: u64,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        ReconnectPolicy {
            attempts: 0,
            delay_ms: RECONNECT_BASE_DELAY_MS,
        }
    }

    /// Records an attempt and returns `(attempt_number, delay_to_wait)`.
    /// The delay returned is the one to sleep *before* retrying; the
    /// policy's internal delay is doubled (capped) for next time.
    pub fn attempt(&mut self) -> (u32, Duration) {
        self.attempts += 1;
        let delay = Duration::from_millis(self.delay_ms);
        self.delay_ms = (self.delay_ms * 2).min(RECONNECT_MAX_DELAY_MS);
        (self.attempts, delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay_ms = RECONNECT_BASE_DELAY_MS;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let mut policy = ReconnectPolicy::new();
        let expected = [100, 200, 400, 800, 1600, 3200, 5000, 5000, 5000];
        for &want in &expected {
            let (_, delay) = policy.attempt();
            assert_eq!(delay.as_millis() as u64, want);
        }
    }

    #[test]
    fn attempt_count_increases_monotonically() {
        let mut policy = ReconnectPolicy::new();
        for expected in 1..=5 {
            let (attempt, _) = policy.attempt();
            assert_eq!(attempt, expected);
        }
    }

    #[test]
    fn reset_restores_base_delay_and_zero_attempts() {
        let mut policy = ReconnectPolicy::new();
        policy.attempt();
        policy.attempt();
        policy.attempt();
        policy.reset();
        assert_eq!(policy.attempts(), 0);
        let (attempt, delay) = policy.attempt();
        assert_eq!(attempt, 1);
        assert_eq!(delay.as_millis() as u64, RECONNECT_BASE_DELAY_MS);
    }
}
