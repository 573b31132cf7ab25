use std::time::Duration;

/// Reconnect schedule for the client connection manager.
///
/// The delay before retry `n` (0-based count of failures so far) is
/// `min(base * 2^n, cap)`. Once `max_attempts` consecutive failures have
/// accumulated no further attempt is scheduled; the counter is reset by the
/// caller on a successful connect.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, given the number of failures so far.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap)
    }

    /// Whether scheduling has reached its terminal state.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
