//! Outbound frame encryptor.
//!
//! One encryptor serves every outgoing media stream of a participant. Each
//! frame is sealed under the key for the generation encoded in the top byte
//! of the truncated nonce; the nonce counter increments per sealing attempt,
//! so the key changes every 2^24 attempts. The codec assigned to the frame's
//! SSRC decides which bytes stay in the clear (see [`crate::codec`]).
//!
//! # Invariants
//!
//! - A truncated nonce is never used twice with the same ratchet
//! - Installing a ratchet restarts the nonce counter
//! - An H.26x frame is resealed under a fresh nonce until no new start
//!   code appears, at most [`MAX_CIPHERTEXT_VALIDATION_ATTEMPTS`] times
//! - The protocol version callback fires only when the version changes

use std::collections::HashMap;

use dave_crypto::{EncryptionKey, KeyRatchet, aead};
use dave_proto::{
    Codec, DISABLED_VERSION, FrameTrailer, KeyGeneration, MAX_TRAILER_SIZE, MediaType,
    ProtoError, ProtocolVersion, TAG_SIZE, generation_of, join_ranges, max_supported_protocol_version,
    split_ranges,
};

use crate::{
    EncryptError, Environment,
    codec::{self, MAX_CIPHERTEXT_VALIDATION_ATTEMPTS},
    log::engine_log,
    stats::{EncryptorStats, PerMedia, micros},
};

/// Invoked after the encryptor's protocol version changed.
pub type ProtocolVersionChangedCallback = Box<dyn FnMut()>;

/// Frame encryptor engine.
pub struct FrameEncryptor<E: Environment> {
    env: E,
    ratchet: Option<Box<dyn KeyRatchet>>,
    current_key: Option<(KeyGeneration, EncryptionKey)>,
    // u64 so exhaustion of the u32 nonce space is observable
    next_nonce: u64,
    passthrough: bool,
    ssrc_codecs: HashMap<u32, Codec>,
    stats: PerMedia<EncryptorStats>,
    protocol_version: ProtocolVersion,
    version_changed: Option<ProtocolVersionChangedCallback>,
}

impl<E: Environment> FrameEncryptor<E> {
    /// Creates an encryptor without a key ratchet, passthrough off.
    pub fn new(env: E) -> Self {
        Self {
            env,
            ratchet: None,
            current_key: None,
            next_nonce: 0,
            passthrough: false,
            ssrc_codecs: HashMap::new(),
            stats: PerMedia::default(),
            protocol_version: max_supported_protocol_version(),
            version_changed: None,
        }
    }

    /// Installs or clears the key ratchet.
    pub fn set_key_ratchet(&mut self, ratchet: Option<Box<dyn KeyRatchet>>) {
        engine_log!(Info, "setting encryptor key ratchet (present: {})", ratchet.is_some());
        self.ratchet = ratchet;
        self.current_key = None;
        self.next_nonce = 0;
    }

    /// Whether a key ratchet is installed.
    pub fn has_key_ratchet(&self) -> bool {
        self.ratchet.is_some()
    }

    /// Enables or disables passthrough.
    pub fn set_passthrough_mode(&mut self, passthrough: bool) {
        self.passthrough = passthrough;
        self.update_protocol_version();
    }

    /// Whether frames are copied unencrypted.
    pub fn is_passthrough_mode(&self) -> bool {
        self.passthrough
    }

    /// Records the codec carried by an RTP stream.
    pub fn assign_ssrc_to_codec(&mut self, ssrc: u32, codec: Codec) {
        self.ssrc_codecs.insert(ssrc, codec);
    }

    /// Codec assigned to `ssrc`, Opus if none was assigned.
    pub fn codec_for_ssrc(&self, ssrc: u32) -> Codec {
        self.ssrc_codecs.get(&ssrc).copied().unwrap_or(Codec::Opus)
    }

    /// Upper bound on the encrypted size of a `frame_size` byte frame.
    pub fn max_ciphertext_byte_size(&self, _media_type: MediaType, frame_size: usize) -> usize {
        frame_size + MAX_TRAILER_SIZE
    }

    /// Counters for `media_type`.
    pub fn stats(&self, media_type: MediaType) -> EncryptorStats {
        *self.stats.get(media_type)
    }

    /// Current protocol version.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Installs or clears the version change callback.
    pub fn set_protocol_version_changed_callback(
        &mut self,
        callback: Option<ProtocolVersionChangedCallback>,
    ) {
        self.version_changed = callback;
    }

    /// Encrypts `frame` into `out`, returning the bytes written.
    ///
    /// `out` must hold at least [`Self::max_ciphertext_byte_size`] bytes.
    pub fn encrypt(
        &mut self,
        media_type: MediaType,
        ssrc: u32,
        frame: &[u8],
        out: &mut [u8],
    ) -> Result<usize, EncryptError> {
        if self.passthrough {
            return self.passthrough_frame(media_type, frame, out);
        }

        let codec = self.codec_for_ssrc(ssrc);
        let mut attempts = 0;

        let start = self.env.now();
        let result = self.seal_frame(codec, frame, out, &mut attempts);
        let elapsed = self.env.now().saturating_duration_since(start);

        let stats = self.stats.get_mut(media_type);
        stats.encrypt_duration_us = stats.encrypt_duration_us.saturating_add(micros(elapsed));
        stats.encrypt_attempts += attempts;
        stats.encrypt_max_attempts = stats.encrypt_max_attempts.max(attempts);

        match &result {
            Ok(_) => stats.encrypt_success_count += 1,
            Err(e) => {
                stats.encrypt_failure_count += 1;
                if e.is_missing_key() {
                    stats.encrypt_missing_key_count += 1;
                }
                engine_log!(Verbose, "encrypt failed for ssrc {} ({:?}): {}", ssrc, codec, e);
            },
        }

        result
    }

    fn passthrough_frame(
        &mut self,
        media_type: MediaType,
        frame: &[u8],
        out: &mut [u8],
    ) -> Result<usize, EncryptError> {
        let stats = self.stats.get_mut(media_type);
        let Some(dest) = out.get_mut(..frame.len()) else {
            stats.encrypt_failure_count += 1;
            return Err(EncryptError::BufferTooSmall { needed: frame.len(), available: out.len() });
        };

        dest.copy_from_slice(frame);
        stats.passthrough_count += 1;
        Ok(frame.len())
    }

    /// Seals `frame` into `out`, counting sealing attempts in `attempts`.
    fn seal_frame(
        &mut self,
        codec: Codec,
        frame: &[u8],
        out: &mut [u8],
        attempts: &mut u64,
    ) -> Result<usize, EncryptError> {
        if self.ratchet.is_none() {
            return Err(EncryptError::MissingKeyRatchet);
        }

        let unencrypted_ranges = codec::unencrypted_ranges(codec, frame);
        let (clear, protected) = split_ranges(frame, &unencrypted_ranges);
        let mut trailer = FrameTrailer { tag: [0; TAG_SIZE], truncated_nonce: 0, unencrypted_ranges };

        while *attempts < MAX_CIPHERTEXT_VALIDATION_ATTEMPTS {
            let nonce = u32::try_from(self.next_nonce).map_err(|_| EncryptError::NonceExhausted)?;
            let key = self.key_for(generation_of(nonce))?;

            // Only the nonce and ranges affect the trailer length.
            trailer.truncated_nonce = nonce;
            let trailer_len = trailer.encoded_len();
            if trailer_len > MAX_TRAILER_SIZE {
                return Err(EncryptError::Trailer(ProtoError::TrailerTooLarge(trailer_len)));
            }
            let needed = frame.len() + trailer_len;
            if out.len() < needed {
                return Err(EncryptError::BufferTooSmall { needed, available: out.len() });
            }

            *attempts += 1;
            self.next_nonce += 1;

            let mut sealed = protected.clone();
            trailer.tag = aead::seal_in_place(&key, nonce, &clear, &mut sealed)
                .map_err(EncryptError::Crypto)?;

            let (body, rest) = out.split_at_mut(frame.len());
            join_ranges(&trailer.unencrypted_ranges, &clear, &sealed, body);
            let written = frame.len() + trailer.encode_into(rest).map_err(EncryptError::Trailer)?;

            if codec::sealed_frame_is_valid(codec, frame, &out[..written]) {
                return Ok(written);
            }
            engine_log!(Verbose, "sealed {:?} frame formed a start code, resealing", codec);
        }

        Err(EncryptError::CiphertextValidation { attempts: *attempts })
    }

    /// Key for `generation`, erasing the previous generation's key on change.
    fn key_for(&mut self, generation: KeyGeneration) -> Result<EncryptionKey, EncryptError> {
        if let Some((current, key)) = &self.current_key {
            if *current == generation {
                return Ok(key.clone());
            }
        }

        let ratchet = self.ratchet.as_mut().ok_or(EncryptError::MissingKeyRatchet)?;
        let key = ratchet.get_key(generation).map_err(EncryptError::MissingKey)?;
        if let Some((previous, _)) = self.current_key.take() {
            ratchet.delete_key(previous);
        }
        engine_log!(Verbose, "encryptor moved to generation {}", generation);
        self.current_key = Some((generation, key.clone()));
        Ok(key)
    }

    fn update_protocol_version(&mut self) {
        let version =
            if self.passthrough { DISABLED_VERSION } else { max_supported_protocol_version() };
        if version == self.protocol_version {
            return;
        }

        self.protocol_version = version;
        if let Some(callback) = self.version_changed.as_mut() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use dave_crypto::HashRatchet;
    use dave_proto::{EncryptedFrame, UnencryptedRange, is_encrypted};

    use super::*;
    use crate::SystemEnv;

    fn encryptor_with_ratchet() -> FrameEncryptor<SystemEnv> {
        let mut encryptor = FrameEncryptor::new(SystemEnv::new());
        encryptor.set_key_ratchet(Some(Box::new(HashRatchet::new(b"sender"))));
        encryptor
    }

    fn encrypt(encryptor: &mut FrameEncryptor<SystemEnv>, frame: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; encryptor.max_ciphertext_byte_size(MediaType::Audio, frame.len())];
        let written = encryptor.encrypt(MediaType::Audio, 1, frame, &mut out).unwrap();
        out.truncate(written);
        out
    }

    #[test]
    fn encrypted_frame_has_trailer() {
        let mut encryptor = encryptor_with_ratchet();
        let out = encrypt(&mut encryptor, b"hello");

        assert!(is_encrypted(&out));
        let parsed = EncryptedFrame::parse(&out).unwrap();
        assert_eq!(parsed.body.len(), 5);
        assert!(parsed.trailer.unencrypted_ranges.is_empty());
        assert_eq!(parsed.trailer.truncated_nonce, 0);
    }

    #[test]
    fn nonce_increments_per_frame() {
        let mut encryptor = encryptor_with_ratchet();
        encrypt(&mut encryptor, b"a");
        let second = encrypt(&mut encryptor, b"b");

        assert_eq!(EncryptedFrame::parse(&second).unwrap().trailer.truncated_nonce, 1);
    }

    #[test]
    fn new_ratchet_restarts_nonce() {
        let mut encryptor = encryptor_with_ratchet();
        encrypt(&mut encryptor, b"a");
        encryptor.set_key_ratchet(Some(Box::new(HashRatchet::new(b"other"))));

        let out = encrypt(&mut encryptor, b"b");
        assert_eq!(EncryptedFrame::parse(&out).unwrap().trailer.truncated_nonce, 0);
    }

    #[test]
    fn missing_ratchet_fails() {
        let mut encryptor = FrameEncryptor::new(SystemEnv::new());
        let mut out = [0u8; 64];

        let result = encryptor.encrypt(MediaType::Audio, 1, b"frame", &mut out);
        assert_eq!(result, Err(EncryptError::MissingKeyRatchet));

        let stats = encryptor.stats(MediaType::Audio);
        assert_eq!(stats.encrypt_failure_count, 1);
        assert_eq!(stats.encrypt_missing_key_count, 1);
    }

    #[test]
    fn small_buffer_fails() {
        let mut encryptor = encryptor_with_ratchet();
        let mut out = [0u8; 8];
        let result = encryptor.encrypt(MediaType::Video, 1, b"frame", &mut out);
        assert!(matches!(result, Err(EncryptError::BufferTooSmall { .. })));
    }

    #[test]
    fn passthrough_copies_frame() {
        let mut encryptor = FrameEncryptor::new(SystemEnv::new());
        encryptor.set_passthrough_mode(true);

        let mut out = [0u8; 16];
        let written = encryptor.encrypt(MediaType::Video, 1, b"plain", &mut out).unwrap();
        assert_eq!(&out[..written], b"plain");
        assert_eq!(encryptor.stats(MediaType::Video).passthrough_count, 1);
        assert_eq!(encryptor.stats(MediaType::Audio).passthrough_count, 0);
    }

    #[test]
    fn stats_track_successes() {
        let mut encryptor = encryptor_with_ratchet();
        encrypt(&mut encryptor, b"a");
        encrypt(&mut encryptor, b"b");

        let stats = encryptor.stats(MediaType::Audio);
        assert_eq!(stats.encrypt_success_count, 2);
        assert_eq!(stats.encrypt_attempts, 2);
        assert_eq!(stats.encrypt_max_attempts, 1);
    }

    #[test]
    fn vp8_key_frame_header_stays_readable() {
        let mut encryptor = encryptor_with_ratchet();
        encryptor.assign_ssrc_to_codec(5, Codec::Vp8);

        let frame: Vec<u8> = (0u8..40).map(|i| i * 2).collect();
        let mut out = vec![0u8; encryptor.max_ciphertext_byte_size(MediaType::Video, frame.len())];
        let written = encryptor.encrypt(MediaType::Video, 5, &frame, &mut out).unwrap();

        let parsed = EncryptedFrame::parse(&out[..written]).unwrap();
        assert_eq!(parsed.trailer.unencrypted_ranges, vec![UnencryptedRange { offset: 0, size: 10 }]);
        assert_eq!(&parsed.body[..10], &frame[..10]);
        assert_ne!(&parsed.body[10..], &frame[10..]);
    }

    #[test]
    fn h264_frame_is_resealed_when_a_start_code_appears() {
        let mut encryptor = encryptor_with_ratchet();
        encryptor.assign_ssrc_to_codec(7, Codec::H264);

        let mut frame = vec![0, 0, 0, 1, 0x65];
        frame.extend(std::iter::repeat_n(0xAB, 16 * 1024));
        let mut out = vec![0u8; encryptor.max_ciphertext_byte_size(MediaType::Video, frame.len())];

        // About one frame in a thousand forms a start code on its first try.
        for _ in 0..100_000 {
            let before = encryptor.stats(MediaType::Video).encrypt_attempts;
            let written = encryptor.encrypt(MediaType::Video, 7, &frame, &mut out).unwrap();
            let spent = encryptor.stats(MediaType::Video).encrypt_attempts - before;

            assert!(codec::sealed_frame_is_valid(Codec::H264, &frame, &out[..written]));
            if spent > 1 {
                assert_eq!(encryptor.stats(MediaType::Video).encrypt_max_attempts, spent);
                return;
            }
        }
        panic!("no frame needed a second sealing attempt");
    }

    #[test]
    fn codec_defaults_to_opus() {
        let mut encryptor = FrameEncryptor::new(SystemEnv::new());
        assert_eq!(encryptor.codec_for_ssrc(42), Codec::Opus);

        encryptor.assign_ssrc_to_codec(42, Codec::Vp8);
        assert_eq!(encryptor.codec_for_ssrc(42), Codec::Vp8);
    }

    #[test]
    fn version_callback_fires_on_change_only() {
        let calls = Rc::new(Cell::new(0));
        let mut encryptor = FrameEncryptor::new(SystemEnv::new());
        let counter = Rc::clone(&calls);
        encryptor.set_protocol_version_changed_callback(Some(Box::new(move || {
            counter.set(counter.get() + 1);
        })));

        assert_eq!(encryptor.protocol_version(), max_supported_protocol_version());
        encryptor.set_passthrough_mode(false);
        assert_eq!(calls.get(), 0);

        encryptor.set_passthrough_mode(true);
        assert_eq!(encryptor.protocol_version(), DISABLED_VERSION);
        assert_eq!(calls.get(), 1);

        encryptor.set_passthrough_mode(true);
        assert_eq!(calls.get(), 1);
    }
}
