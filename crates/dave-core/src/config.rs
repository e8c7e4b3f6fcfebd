//! Decryptor configuration.

use std::time::Duration;

use dave_crypto::MAX_GENERATION_GAP;
use dave_proto::KeyGeneration;
use serde::{Deserialize, Serialize};

/// Transition window used when the caller does not pick one.
pub const DEFAULT_TRANSITION_EXPIRY: Duration = Duration::from_secs(10);

/// Most nonces a decryptor remembers as missing per key ratchet.
pub const MAX_MISSING_NONCES: usize = 1000;

/// Decryptor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptorConfig {
    /// How long a replaced ratchet or disabled passthrough stays usable.
    pub transition_expiry: Duration,
    /// Generations older than the newest one that keep their keys.
    pub retained_generations: KeyGeneration,
    /// Largest generation jump accepted in one frame.
    pub max_generation_gap: KeyGeneration,
    /// Size of the out-of-order nonce window.
    pub max_missing_nonces: usize,
}

impl Default for DecryptorConfig {
    fn default() -> Self {
        Self {
            transition_expiry: DEFAULT_TRANSITION_EXPIRY,
            retained_generations: 1,
            max_generation_gap: MAX_GENERATION_GAP,
            max_missing_nonces: MAX_MISSING_NONCES,
        }
    }
}
