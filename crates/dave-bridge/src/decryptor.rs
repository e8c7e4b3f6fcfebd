//! Decryptor adapter.

use std::{fmt, time::Duration};

use bytes::Bytes;
use dave_core::{DecryptorStats, Environment, FrameDecryptor, SystemEnv};
use dave_proto::MediaType;

use crate::{
    Host, KeyRatchetHandle, marshal,
    registry::{HostRefs, Traverse},
};

/// Host-facing frame decryptor.
pub struct Decryptor<E: Environment = SystemEnv> {
    engine: FrameDecryptor<E>,
}

impl Decryptor<SystemEnv> {
    /// Creates a decryptor on the system clock.
    pub fn new(host: &Host) -> Self {
        Self::with_env(host, SystemEnv::new())
    }
}

impl<E: Environment> Decryptor<E> {
    /// Creates a decryptor on `env`, configured by the host.
    pub fn with_env(host: &Host, env: E) -> Self {
        Self { engine: FrameDecryptor::new(env, host.config().decryptor) }
    }

    /// Moves to the ratchet in `handle`.
    ///
    /// Older ratchets stay usable for `expiry`, or the configured default
    /// when `None`.
    pub fn transition_to_key_ratchet(
        &mut self,
        handle: Option<KeyRatchetHandle>,
        expiry: Option<Duration>,
    ) {
        let expiry = expiry.unwrap_or(self.engine.config().transition_expiry);
        if let Some(handle) = &handle {
            tracing::debug!(handle = %handle.id(), ?expiry, "decryptor ratchet transition");
        }
        self.engine.transition_to_key_ratchet(handle.map(KeyRatchetHandle::into_ratchet), expiry);
    }

    /// Enables passthrough, or disables it after `expiry`.
    pub fn transition_to_passthrough_mode(&mut self, passthrough: bool, expiry: Option<Duration>) {
        let expiry = expiry.unwrap_or(self.engine.config().transition_expiry);
        self.engine.transition_to_passthrough_mode(passthrough, expiry);
    }

    /// Decrypts one frame.
    ///
    /// Returns `None` on failure; the reason is logged at error level.
    pub fn decrypt(&mut self, media_type: MediaType, frame: impl AsRef<[u8]>) -> Option<Bytes> {
        let frame = marshal::to_native(frame);
        let mut out = vec![0; self.engine.max_plaintext_byte_size(media_type, frame.len())];

        match self.engine.decrypt(media_type, &frame, &mut out) {
            Ok(written) => {
                out.truncate(written);
                Some(marshal::to_host(out))
            },
            Err(e) => {
                tracing::error!(?media_type, error = %e, "frame decryption failed");
                None
            },
        }
    }

    /// Upper bound on the plaintext size of an `encrypted_size` byte frame.
    pub fn get_max_plaintext_byte_size(&self, media_type: MediaType, encrypted_size: usize) -> usize {
        self.engine.max_plaintext_byte_size(media_type, encrypted_size)
    }

    /// Number of ratchets still usable.
    pub fn active_ratchets(&self) -> usize {
        self.engine.active_ratchets()
    }

    /// Counters for `media_type`.
    pub fn get_stats(&self, media_type: MediaType) -> DecryptorStats {
        self.engine.stats(media_type)
    }
}

impl<E: Environment> Traverse for Decryptor<E> {
    fn collect_references(&self) -> HostRefs {
        HostRefs::new("Decryptor", None)
    }
}

impl<E: Environment> fmt::Debug for Decryptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor").field("active_ratchets", &self.active_ratchets()).finish()
    }
}
