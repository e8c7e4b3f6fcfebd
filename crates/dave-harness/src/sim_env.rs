//! Simulated environment: manual clock and seeded RNG.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use dave_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

struct SimState {
    now: Instant,
    rng: ChaCha8Rng,
}

/// Deterministic environment shared by every simulated participant.
///
/// Clones share one clock and one RNG stream. Time only moves when
/// [`SimEnv::advance`] is called.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
    seed: u64,
}

impl SimEnv {
    /// Creates an environment with the given RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        tracing::debug!(seed, "simulation environment created");
        Self {
            state: Arc::new(Mutex::new(SimState {
                now: Instant::now(),
                rng: ChaCha8Rng::seed_from_u64(seed),
            })),
            seed,
        }
    }

    /// Seed this environment was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += by;
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("seed", &self.seed).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).rng.fill_bytes(buffer);
    }
}
