//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` uses real monotonic time, wall-clock time for message
//! timestamps, OS randomness for temp ids and jitter, and tokio timers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parley_core::Environment;

/// Production environment using system time and OS randomness.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. Temp ids must be unique, and a
/// process without working randomness cannot guarantee that.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn wall_clock_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use parley_core::model::TempId;

    use super::*;

    #[test]
    fn temp_ids_are_unique_and_prefixed() {
        let env = SystemEnv::new();

        let a = TempId::generate(&env);
        let b = TempId::generate(&env);

        assert_ne!(a, b);
        assert!(a.as_str().starts_with(TempId::PREFIX));
        assert_eq!(a.as_str().len(), TempId::PREFIX.len() + 32);
    }

    #[test]
    fn wall_clock_is_after_2020() {
        assert!(SystemEnv::new().wall_clock_millis() > 1_577_836_800_000);
    }

    #[tokio::test]
    async fn system_env_sleep_works() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_millis(20)).await;

        assert!(env.now() - start >= Duration::from_millis(20));
    }
}
