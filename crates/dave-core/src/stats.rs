//! Per-media frame statistics.
//!
//! Engines keep one counter set per [`MediaType`]. Reads return a copy, so a
//! snapshot never changes after it was taken.

use std::time::Duration;

use dave_proto::MediaType;
use serde::Serialize;

/// Encryptor counters for one media type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EncryptorStats {
    /// Frames copied unencrypted.
    pub passthrough_count: u64,
    /// Frames encrypted.
    pub encrypt_success_count: u64,
    /// Frames that failed to encrypt.
    pub encrypt_failure_count: u64,
    /// Total time spent encrypting, in microseconds.
    pub encrypt_duration_us: u64,
    /// Total encryption attempts.
    pub encrypt_attempts: u64,
    /// Most attempts spent on a single frame.
    pub encrypt_max_attempts: u64,
    /// Failures caused by missing key material.
    pub encrypt_missing_key_count: u64,
}

/// Decryptor counters for one media type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecryptorStats {
    /// Unencrypted frames accepted during passthrough.
    pub passthrough_count: u64,
    /// Frames decrypted.
    pub decrypt_success_count: u64,
    /// Frames that failed to decrypt.
    pub decrypt_failure_count: u64,
    /// Total time spent decrypting, in microseconds.
    pub decrypt_duration_us: u64,
    /// Total decryption attempts across key ratchets.
    pub decrypt_attempts: u64,
    /// Failures caused by missing key material.
    pub decrypt_missing_key_count: u64,
    /// Frames rejected for a replayed or stale nonce.
    pub decrypt_invalid_nonce_count: u64,
}

/// Saturating microsecond count of a duration.
pub(crate) fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// One value per media type.
#[derive(Debug, Clone, Default)]
pub(crate) struct PerMedia<T>([T; 2]);

impl<T> PerMedia<T> {
    pub(crate) fn get(&self, media_type: MediaType) -> &T {
        &self.0[media_type.index()]
    }

    pub(crate) fn get_mut(&mut self, media_type: MediaType) -> &mut T {
        &mut self.0[media_type.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_media_counters_are_independent() {
        let mut stats: PerMedia<EncryptorStats> = PerMedia::default();
        stats.get_mut(MediaType::Video).encrypt_success_count += 3;

        assert_eq!(stats.get(MediaType::Audio).encrypt_success_count, 0);
        assert_eq!(stats.get(MediaType::Video).encrypt_success_count, 3);
    }

    #[test]
    fn micros_saturates() {
        assert_eq!(micros(Duration::from_millis(2)), 2000);
        assert_eq!(micros(Duration::MAX), u64::MAX);
    }
}
