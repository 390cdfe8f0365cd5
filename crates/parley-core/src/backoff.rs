//! Reconnect backoff policy.

use std::time::Duration;

/// Delay before the first reconnect attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Upper bound on any reconnect delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Consecutive failures tolerated before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Capped exponential backoff with upward jitter.
///
/// Attempt `n` (1-based) waits `base * 2^(n-1)` plus a jitter in
/// `[0, base * 2^(n-1) / 2)`, capped at `cap`.
///
/// # Invariants
///
/// - Monotonicity: `delay(n + 1, _) >= delay(n, _)` for any entropy values.
///   The jitter never exceeds half of the un-jittered delay, and the next
///   attempt doubles it.
/// - Bounded: `delay(n, _) <= cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Un-jittered delay of the first attempt
    pub base: Duration,
    /// Maximum delay
    pub cap: Duration,
    /// Consecutive failures after which automatic retry stops
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// `entropy` selects the jitter; pass a fresh random value per attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32, entropy: u64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let raw = millis(self.base).saturating_mul(1u64 << exponent);

        let spread = raw / 2;
        let jitter = if spread == 0 { 0 } else { entropy % spread };

        Duration::from_millis(raw.saturating_add(jitter).min(millis(self.cap)))
    }

    /// Whether `failures` consecutive failures exhaust the retry budget.
    #[must_use]
    pub fn exhausted(&self, failures: u32) -> bool {
        failures > self.max_attempts
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base_without_jitter() {
        let backoff = Backoff::default();

        // entropy 0 always selects zero jitter
        assert_eq!(backoff.delay(1, 0), Duration::from_secs(2));
        assert_eq!(backoff.delay(2, 0), Duration::from_secs(4));
        assert_eq!(backoff.delay(3, 0), Duration::from_secs(8));
        assert_eq!(backoff.delay(4, 0), Duration::from_secs(16));
        assert_eq!(backoff.delay(5, 0), Duration::from_secs(30));
        assert_eq!(backoff.delay(40, 0), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_below_half_the_raw_delay() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay(1, 999), Duration::from_millis(2999));
        assert_eq!(backoff.delay(1, 1000), Duration::from_millis(2000));
        assert!(backoff.delay(2, u64::MAX) < Duration::from_secs(6));
    }

    #[test]
    fn zero_base_never_waits() {
        let backoff = Backoff { base: Duration::ZERO, ..Backoff::default() };
        assert_eq!(backoff.delay(5, 12345), Duration::ZERO);
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let backoff = Backoff { max_attempts: 3, ..Backoff::default() };
        assert!(!backoff.exhausted(3));
        assert!(backoff.exhausted(4));
    }
}
