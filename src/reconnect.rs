//! Reconnect scheduling.
//!
//! After an unexpected disconnect the session asks its [`ReconnectPolicy`]
//! how long to wait before the next attempt. The default is a fixed delay
//! with no backoff or jitter.

use std::time::Duration;

use crate::constants::DEFAULT_RECONNECT_DELAY;

/// Decides when (and whether) to try connecting again.
pub trait ReconnectPolicy {
    /// Delay before attempt number `attempt` (1 for the first retry after a
    /// disconnect, reset once a connection opens). `None` stops retrying.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Wait the same amount of time before every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    fn default() -> Self {
        Self(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(self.0)
    }
}

/// Never reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_ignores_attempt() {
        let policy = FixedDelay::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(50), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_no_reconnect() {
        assert_eq!(NoReconnect.next_delay(1), None);
    }
}
