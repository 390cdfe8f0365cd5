//! Simulated environment.
//!
//! Time comes from tokio's clock, so tests that start with
//! `#[tokio::test(start_paused = true)]` run reconnect schedules and
//! heartbeats in virtual time. Randomness comes from a seeded ChaCha8
//! generator shared by all clones.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use parley_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seed used by [`SimEnv::new`].
pub const DEFAULT_SEED: u64 = 0x7061_726c_6579;

/// Wall clock reading at the moment a [`SimEnv`] is created.
pub const BASE_WALL_CLOCK_MILLIS: u64 = 1_700_000_000_000;

/// Deterministic environment for simulation.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    epoch: tokio::time::Instant,
}

impl SimEnv {
    /// Environment seeded with [`DEFAULT_SEED`].
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: tokio::time::Instant::now(),
        }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock_millis(&self) -> u64 {
        let elapsed = u64::try_from((self.now() - self.epoch).as_millis()).unwrap_or(u64::MAX);
        BASE_WALL_CLOCK_MILLIS.saturating_add(elapsed)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use parley_core::model::TempId;

    use super::*;

    #[test]
    fn same_seed_same_temp_ids() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);

        assert_eq!(TempId::generate(&a), TempId::generate(&b));
        assert_eq!(a.random_u64(), b.random_u64());
    }

    #[test]
    fn clones_share_the_generator() {
        let env = SimEnv::with_seed(7);
        let clone = env.clone();

        assert_ne!(env.random_u64(), clone.random_u64());
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_follows_virtual_time() {
        let env = SimEnv::new();
        let start = env.wall_clock_millis();

        env.sleep(Duration::from_secs(30)).await;

        assert_eq!(env.wall_clock_millis() - start, 30_000);
    }
}
