//! Encryptor adapter.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use bytes::Bytes;
use dave_core::{
    EncryptorStats, Environment, FrameEncryptor, ProtocolVersionChangedCallback, SystemEnv,
};
use dave_proto::{Codec, MediaType, ProtocolVersion};

use crate::{
    Host, KeyRatchetHandle, marshal,
    registry::{self, CallbackId, CallbackRegistry, HostCallback, HostRefs, Traverse},
};

/// Host-facing frame encryptor.
pub struct Encryptor<E: Environment = SystemEnv> {
    engine: FrameEncryptor<E>,
    registry: Weak<RefCell<CallbackRegistry>>,
    version_callback: Option<CallbackId>,
}

impl Encryptor<SystemEnv> {
    /// Creates an encryptor on the system clock.
    pub fn new(host: &Host) -> Self {
        Self::with_env(host, SystemEnv::new())
    }
}

impl<E: Environment> Encryptor<E> {
    /// Creates an encryptor on `env`.
    pub fn with_env(host: &Host, env: E) -> Self {
        Self {
            engine: FrameEncryptor::new(env),
            registry: Rc::downgrade(host.registry()),
            version_callback: None,
        }
    }

    /// Installs the ratchet in `handle`, or clears it.
    pub fn set_key_ratchet(&mut self, handle: Option<KeyRatchetHandle>) {
        if let Some(handle) = &handle {
            tracing::debug!(handle = %handle.id(), "encryptor ratchet installed");
        }
        self.engine.set_key_ratchet(handle.map(KeyRatchetHandle::into_ratchet));
    }

    /// Enables or disables passthrough.
    pub fn set_passthrough_mode(&mut self, passthrough: bool) {
        self.engine.set_passthrough_mode(passthrough);
    }

    /// Whether a key ratchet is installed.
    pub fn has_key_ratchet(&self) -> bool {
        self.engine.has_key_ratchet()
    }

    /// Whether frames are copied unencrypted.
    pub fn is_passthrough_mode(&self) -> bool {
        self.engine.is_passthrough_mode()
    }

    /// Records the codec carried by `ssrc`.
    pub fn assign_ssrc_to_codec(&mut self, ssrc: u32, codec: Codec) {
        self.engine.assign_ssrc_to_codec(ssrc, codec);
    }

    /// Codec assigned to `ssrc`.
    pub fn codec_for_ssrc(&self, ssrc: u32) -> Codec {
        self.engine.codec_for_ssrc(ssrc)
    }

    /// Encrypts one frame.
    ///
    /// Returns `None` on failure; the reason is logged at error level.
    pub fn encrypt(
        &mut self,
        media_type: MediaType,
        ssrc: u32,
        frame: impl AsRef<[u8]>,
    ) -> Option<Bytes> {
        let frame = marshal::to_native(frame);
        let mut out = vec![0; self.engine.max_ciphertext_byte_size(media_type, frame.len())];

        match self.engine.encrypt(media_type, ssrc, &frame, &mut out) {
            Ok(written) => {
                out.truncate(written);
                Some(marshal::to_host(out))
            },
            Err(e) => {
                tracing::error!(?media_type, ssrc, error = %e, "frame encryption failed");
                None
            },
        }
    }

    /// Upper bound on the encrypted size of a `frame_size` byte frame.
    pub fn get_max_ciphertext_byte_size(&self, media_type: MediaType, frame_size: usize) -> usize {
        self.engine.max_ciphertext_byte_size(media_type, frame_size)
    }

    /// Counters for `media_type`.
    pub fn get_stats(&self, media_type: MediaType) -> EncryptorStats {
        self.engine.stats(media_type)
    }

    /// Current protocol version.
    pub fn get_protocol_version(&self) -> ProtocolVersion {
        self.engine.protocol_version()
    }

    /// Installs or clears the protocol version change callback.
    pub fn set_protocol_version_changed_callback(
        &mut self,
        callback: Option<ProtocolVersionChangedCallback>,
    ) {
        if let Some(previous) = self.version_callback.take() {
            registry::release(&self.registry, previous);
        }

        let thunk = callback.and_then(|callback| {
            let Some(registry) = self.registry.upgrade() else {
                tracing::warn!("host gone, version change callback dropped");
                return None;
            };
            let id = registry.borrow_mut().register(HostCallback::VersionChanged(callback));
            self.version_callback = Some(id);

            let weak = self.registry.clone();
            let thunk: ProtocolVersionChangedCallback =
                Box::new(move || registry::invoke_version_changed(&weak, id));
            Some(thunk)
        });

        self.engine.set_protocol_version_changed_callback(thunk);
    }
}

impl<E: Environment> Traverse for Encryptor<E> {
    fn collect_references(&self) -> HostRefs {
        HostRefs::new("Encryptor", self.version_callback)
    }
}

impl<E: Environment> Drop for Encryptor<E> {
    fn drop(&mut self) {
        if let Some(id) = self.version_callback.take() {
            registry::release(&self.registry, id);
        }
    }
}

impl<E: Environment> fmt::Debug for Encryptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("has_key_ratchet", &self.has_key_ratchet())
            .field("passthrough", &self.is_passthrough_mode())
            .field("version_callback", &self.version_callback)
            .finish_non_exhaustive()
    }
}
