//! Inbound frame decryptor.
//!
//! A decryptor handles the frames of one remote sender. It holds one
//! cryptor manager per key ratchet it has been given; when the session
//! moves to a new epoch the previous ratchets stay usable for a transition
//! window so in-flight frames from the old epoch still decrypt.
//!
//! # Invariants
//!
//! - Expired managers are evicted before every decrypt
//! - A transition only ever shortens existing expiries
//! - A nonce is accepted at most once per ratchet
//! - The first frame a ratchet opens leaves the nonces below it open, up to
//!   the missing-nonce window, so frames reordered ahead of it still decrypt
//! - Keys older than the retained generations are erased from the ratchet

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use dave_crypto::{CryptoError, KeyRatchet, aead};
use dave_proto::{
    EncryptedFrame, FrameTrailer, KeyGeneration, MediaType, TruncatedNonce, is_encrypted,
    join_ranges, split_ranges,
};

use crate::{
    DecryptError, DecryptorConfig, Environment,
    log::engine_log,
    stats::{DecryptorStats, PerMedia, micros},
};

/// When unencrypted frames are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassthroughWindow {
    Closed,
    Until(Instant),
    Open,
}

impl PassthroughWindow {
    fn allows(self, now: Instant) -> bool {
        match self {
            Self::Closed => false,
            Self::Until(deadline) => now < deadline,
            Self::Open => true,
        }
    }

    fn clamp(self, deadline: Instant) -> Self {
        match self {
            Self::Closed => Self::Closed,
            Self::Until(current) => Self::Until(current.min(deadline)),
            Self::Open => Self::Until(deadline),
        }
    }
}

/// Key ratchet plus its replay window and expiry.
struct CryptorManager {
    ratchet: Box<dyn KeyRatchet>,
    expiry: Option<Instant>,
    newest_generation: KeyGeneration,
    oldest_kept_generation: KeyGeneration,
    newest_nonce: Option<TruncatedNonce>,
    missing_nonces: VecDeque<TruncatedNonce>,
}

impl CryptorManager {
    fn new(ratchet: Box<dyn KeyRatchet>) -> Self {
        Self {
            ratchet,
            expiry: None,
            newest_generation: 0,
            oldest_kept_generation: 0,
            newest_nonce: None,
            missing_nonces: VecDeque::new(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    fn clamp_expiry(&mut self, deadline: Instant) {
        self.expiry = Some(self.expiry.map_or(deadline, |current| current.min(deadline)));
    }

    fn can_process_nonce(&self, nonce: TruncatedNonce) -> bool {
        match self.newest_nonce {
            None => true,
            Some(newest) if nonce > newest => true,
            Some(_) => self.missing_nonces.contains(&nonce),
        }
    }

    /// Opens one frame whose body was split into `clear` and `protected`.
    fn open(
        &mut self,
        config: &DecryptorConfig,
        trailer: &FrameTrailer,
        clear: &[u8],
        protected: &[u8],
        out: &mut [u8],
    ) -> Result<usize, DecryptError> {
        let nonce = trailer.truncated_nonce;
        if !self.can_process_nonce(nonce) {
            return Err(DecryptError::InvalidNonce(nonce));
        }

        let generation = trailer.generation();
        if generation < self.oldest_kept_generation {
            return Err(DecryptError::MissingKey(CryptoError::KeyErased { generation }));
        }
        if generation > self.newest_generation.saturating_add(config.max_generation_gap) {
            return Err(DecryptError::MissingKey(CryptoError::GenerationTooFar {
                generation,
                next: self.newest_generation,
            }));
        }

        let key = self.ratchet.get_key(generation).map_err(DecryptError::MissingKey)?;

        let mut plaintext = protected.to_vec();
        aead::open_in_place(&key, nonce, clear, &mut plaintext, &trailer.tag)
            .map_err(|_| DecryptError::Authentication)?;
        let written = join_ranges(&trailer.unencrypted_ranges, clear, &plaintext, out);

        self.record_success(config, generation, nonce);
        Ok(written)
    }

    fn record_success(
        &mut self,
        config: &DecryptorConfig,
        generation: KeyGeneration,
        nonce: TruncatedNonce,
    ) {
        match self.newest_nonce {
            Some(newest) if nonce <= newest => {
                self.missing_nonces.retain(|&missing| missing != nonce);
            },
            newest => {
                let window = u32::try_from(config.max_missing_nonces).unwrap_or(u32::MAX);
                let floor = newest.map_or(0, |newest| newest.saturating_add(1));
                let first_missing = floor.max(nonce.saturating_sub(window));
                self.missing_nonces.extend(first_missing..nonce);
                while self.missing_nonces.len() > config.max_missing_nonces {
                    self.missing_nonces.pop_front();
                }
                self.newest_nonce = Some(nonce);
            },
        }

        if generation > self.newest_generation {
            self.newest_generation = generation;
            let keep_from = generation.saturating_sub(config.retained_generations);
            for old in self.oldest_kept_generation..keep_from {
                self.ratchet.delete_key(old);
            }
            self.oldest_kept_generation = self.oldest_kept_generation.max(keep_from);
        }
    }
}

/// Frame decryptor engine.
pub struct FrameDecryptor<E: Environment> {
    env: E,
    config: DecryptorConfig,
    managers: VecDeque<CryptorManager>,
    passthrough: PassthroughWindow,
    stats: PerMedia<DecryptorStats>,
}

impl<E: Environment> FrameDecryptor<E> {
    /// Creates a decryptor with no ratchets and passthrough closed.
    pub fn new(env: E, config: DecryptorConfig) -> Self {
        Self {
            env,
            config,
            managers: VecDeque::new(),
            passthrough: PassthroughWindow::Closed,
            stats: PerMedia::default(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &DecryptorConfig {
        &self.config
    }

    /// Moves to a new key ratchet.
    ///
    /// Existing ratchets remain usable for at most `transition_expiry`.
    /// Passing `None` only starts that countdown.
    pub fn transition_to_key_ratchet(
        &mut self,
        ratchet: Option<Box<dyn KeyRatchet>>,
        transition_expiry: Duration,
    ) {
        engine_log!(
            Info,
            "transitioning to key ratchet (present: {}), expiry {:?}",
            ratchet.is_some(),
            transition_expiry
        );

        let deadline = self.env.now() + transition_expiry;
        for manager in &mut self.managers {
            manager.clamp_expiry(deadline);
        }

        if let Some(ratchet) = ratchet {
            self.managers.push_back(CryptorManager::new(ratchet));
        }
    }

    /// Enables passthrough, or closes it after `transition_expiry`.
    pub fn transition_to_passthrough_mode(
        &mut self,
        passthrough: bool,
        transition_expiry: Duration,
    ) {
        self.passthrough = if passthrough {
            PassthroughWindow::Open
        } else {
            self.passthrough.clamp(self.env.now() + transition_expiry)
        };
    }

    /// Number of ratchets still usable.
    pub fn active_ratchets(&self) -> usize {
        self.managers.len()
    }

    /// Upper bound on the plaintext size of an `encrypted_size` byte frame.
    pub fn max_plaintext_byte_size(&self, _media_type: MediaType, encrypted_size: usize) -> usize {
        encrypted_size
    }

    /// Counters for `media_type`.
    pub fn stats(&self, media_type: MediaType) -> DecryptorStats {
        *self.stats.get(media_type)
    }

    /// Decrypts `frame` into `out`, returning the bytes written.
    pub fn decrypt(
        &mut self,
        media_type: MediaType,
        frame: &[u8],
        out: &mut [u8],
    ) -> Result<usize, DecryptError> {
        let start = self.env.now();
        self.evict_expired(start);

        let result = self.decrypt_frame(media_type, start, frame, out);

        let elapsed = self.env.now().saturating_duration_since(start);
        let stats = self.stats.get_mut(media_type);
        stats.decrypt_duration_us = stats.decrypt_duration_us.saturating_add(micros(elapsed));

        if let Err(e) = &result {
            stats.decrypt_failure_count += 1;
            engine_log!(Verbose, "decrypt failed: {}", e);
        }
        result
    }

    fn decrypt_frame(
        &mut self,
        media_type: MediaType,
        now: Instant,
        frame: &[u8],
        out: &mut [u8],
    ) -> Result<usize, DecryptError> {
        let parsed = match EncryptedFrame::parse(frame) {
            Ok(parsed) => parsed,
            Err(_) if self.passthrough.allows(now) => {
                let available = out.len();
                let dest = out.get_mut(..frame.len()).ok_or(DecryptError::BufferTooSmall {
                    needed: frame.len(),
                    available,
                })?;
                dest.copy_from_slice(frame);
                self.stats.get_mut(media_type).passthrough_count += 1;
                return Ok(frame.len());
            },
            Err(_) if !is_encrypted(frame) => return Err(DecryptError::PassthroughNotAllowed),
            Err(e) => return Err(e.into()),
        };

        if out.len() < parsed.body.len() {
            return Err(DecryptError::BufferTooSmall {
                needed: parsed.body.len(),
                available: out.len(),
            });
        }

        if self.managers.is_empty() {
            self.stats.get_mut(media_type).decrypt_missing_key_count += 1;
            return Err(DecryptError::MissingKeyRatchet);
        }

        let (clear, protected) = split_ranges(parsed.body, &parsed.trailer.unencrypted_ranges);
        let stats = self.stats.get_mut(media_type);
        let mut failure = None;

        // Newest ratchet first; older ones only matter during a transition.
        for manager in self.managers.iter_mut().rev() {
            stats.decrypt_attempts += 1;
            match manager.open(&self.config, &parsed.trailer, &clear, &protected, out) {
                Ok(written) => {
                    stats.decrypt_success_count += 1;
                    return Ok(written);
                },
                Err(e) => {
                    if e.is_missing_key() {
                        stats.decrypt_missing_key_count += 1;
                    }
                    if matches!(e, DecryptError::InvalidNonce(_)) {
                        stats.decrypt_invalid_nonce_count += 1;
                    }
                    // Keep the most telling error: anything beats a missing key.
                    if failure.as_ref().is_none_or(DecryptError::is_missing_key) {
                        failure = Some(e);
                    }
                },
            }
        }

        Err(failure.unwrap_or(DecryptError::MissingKeyRatchet))
    }

    fn evict_expired(&mut self, now: Instant) {
        let before = self.managers.len();
        self.managers.retain(|manager| !manager.is_expired(now));

        let evicted = before - self.managers.len();
        if evicted > 0 {
            engine_log!(Verbose, "evicted {} expired key ratchets", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use dave_crypto::HashRatchet;
    use dave_proto::MAX_TRAILER_SIZE;

    use super::*;
    use crate::FrameEncryptor;

    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Environment for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0x5A);
        }
    }

    fn seal(secret: &[u8], frames: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut encryptor = FrameEncryptor::new(ManualClock::new());
        encryptor.set_key_ratchet(Some(Box::new(HashRatchet::new(secret))));
        frames
            .iter()
            .map(|frame| {
                let mut out = vec![0u8; frame.len() + MAX_TRAILER_SIZE];
                let n = encryptor.encrypt(MediaType::Audio, 1, frame, &mut out).unwrap();
                out.truncate(n);
                out
            })
            .collect()
    }

    fn open(decryptor: &mut FrameDecryptor<ManualClock>, frame: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let mut out = vec![0u8; frame.len()];
        let n = decryptor.decrypt(MediaType::Audio, frame, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    fn decryptor_with(clock: &ManualClock, secret: &[u8]) -> FrameDecryptor<ManualClock> {
        let mut decryptor = FrameDecryptor::new(clock.clone(), DecryptorConfig::default());
        decryptor
            .transition_to_key_ratchet(Some(Box::new(HashRatchet::new(secret))), Duration::ZERO);
        decryptor
    }

    #[test]
    fn decrypts_matching_ratchet() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"sender");
        let frames = seal(b"sender", &[b"one", b"two"]);

        assert_eq!(open(&mut decryptor, &frames[0]).unwrap(), b"one");
        assert_eq!(open(&mut decryptor, &frames[1]).unwrap(), b"two");
        assert_eq!(decryptor.stats(MediaType::Audio).decrypt_success_count, 2);
    }

    #[test]
    fn mismatched_ratchet_fails() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"someone else");
        let frames = seal(b"sender", &[b"one"]);

        assert_eq!(open(&mut decryptor, &frames[0]), Err(DecryptError::Authentication));
        assert_eq!(decryptor.stats(MediaType::Audio).decrypt_failure_count, 1);
    }

    #[test]
    fn replayed_nonce_is_rejected() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"sender");
        let frames = seal(b"sender", &[b"one"]);

        open(&mut decryptor, &frames[0]).unwrap();
        assert_eq!(open(&mut decryptor, &frames[0]), Err(DecryptError::InvalidNonce(0)));
        assert_eq!(decryptor.stats(MediaType::Audio).decrypt_invalid_nonce_count, 1);
    }

    #[test]
    fn out_of_order_frames_are_accepted_once() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"sender");
        let frames = seal(b"sender", &[b"zero", b"one", b"two"]);

        open(&mut decryptor, &frames[0]).unwrap();
        open(&mut decryptor, &frames[2]).unwrap();
        assert_eq!(open(&mut decryptor, &frames[1]).unwrap(), b"one");
        assert_eq!(open(&mut decryptor, &frames[1]), Err(DecryptError::InvalidNonce(1)));
    }

    #[test]
    fn frames_older_than_the_first_one_seen_are_accepted() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"sender");
        let frames = seal(b"sender", &[b"zero", b"one", b"two", b"three"]);

        assert_eq!(open(&mut decryptor, &frames[2]).unwrap(), b"two");
        assert_eq!(open(&mut decryptor, &frames[0]).unwrap(), b"zero");
        assert_eq!(open(&mut decryptor, &frames[3]).unwrap(), b"three");
        assert_eq!(open(&mut decryptor, &frames[1]).unwrap(), b"one");

        for frame in &frames {
            assert!(matches!(open(&mut decryptor, frame), Err(DecryptError::InvalidNonce(_))));
        }
    }

    #[test]
    fn first_frame_opens_a_bounded_window() {
        let mut manager = CryptorManager::new(Box::new(HashRatchet::new(b"s")));
        let config = DecryptorConfig { max_missing_nonces: 4, ..DecryptorConfig::default() };

        manager.record_success(&config, 0, 10);
        assert_eq!(manager.missing_nonces, [6, 7, 8, 9]);
        assert!(manager.can_process_nonce(6));
        assert!(!manager.can_process_nonce(5));
        assert!(!manager.can_process_nonce(10));
    }

    #[test]
    fn codec_ranges_survive_decryption() {
        let clock = ManualClock::new();
        let mut encryptor = FrameEncryptor::new(clock.clone());
        encryptor.set_key_ratchet(Some(Box::new(HashRatchet::new(b"sender"))));
        encryptor.assign_ssrc_to_codec(3, dave_proto::Codec::H264);
        let mut decryptor = decryptor_with(&clock, b"sender");

        let frame = [0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f, 0, 0, 1, 0x65, 0x88, 0x84, 0x21, 0xA0];
        let mut sealed = vec![0u8; encryptor.max_ciphertext_byte_size(MediaType::Video, frame.len())];
        let n = encryptor.encrypt(MediaType::Video, 3, &frame, &mut sealed).unwrap();
        sealed.truncate(n);

        let parsed = EncryptedFrame::parse(&sealed).unwrap();
        assert!(!parsed.trailer.unencrypted_ranges.is_empty());
        assert_eq!(&parsed.body[..12], &frame[..12]);

        let mut out = vec![0u8; sealed.len()];

        // Clear bytes are authenticated.
        let mut tampered = sealed.clone();
        tampered[4] ^= 0x01;
        assert_eq!(
            decryptor.decrypt(MediaType::Video, &tampered, &mut out),
            Err(DecryptError::Authentication)
        );

        let written = decryptor.decrypt(MediaType::Video, &sealed, &mut out).unwrap();
        assert_eq!(&out[..written], &frame);
    }

    #[test]
    fn passthrough_needs_room_for_the_frame() {
        let clock = ManualClock::new();
        let mut decryptor = FrameDecryptor::new(clock, DecryptorConfig::default());
        decryptor.transition_to_passthrough_mode(true, Duration::ZERO);

        let mut out = [0u8; 3];
        assert_eq!(
            decryptor.decrypt(MediaType::Audio, b"plain", &mut out),
            Err(DecryptError::BufferTooSmall { needed: 5, available: 3 })
        );
    }

    #[test]
    fn unencrypted_frame_without_passthrough_fails() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"sender");

        assert_eq!(open(&mut decryptor, b"plain"), Err(DecryptError::PassthroughNotAllowed));
    }

    #[test]
    fn passthrough_closes_after_transition() {
        let clock = ManualClock::new();
        let mut decryptor = FrameDecryptor::new(clock.clone(), DecryptorConfig::default());

        decryptor.transition_to_passthrough_mode(true, Duration::ZERO);
        assert_eq!(open(&mut decryptor, b"plain").unwrap(), b"plain");

        decryptor.transition_to_passthrough_mode(false, Duration::from_secs(10));
        clock.advance(Duration::from_secs(9));
        assert!(open(&mut decryptor, b"plain").is_ok());

        clock.advance(Duration::from_secs(1));
        assert_eq!(open(&mut decryptor, b"plain"), Err(DecryptError::PassthroughNotAllowed));
        assert_eq!(decryptor.stats(MediaType::Audio).passthrough_count, 2);
    }

    #[test]
    fn old_ratchet_expires_after_transition() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"old");
        let old_frames = seal(b"old", &[b"a", b"b"]);
        let new_frames = seal(b"new", &[b"c"]);

        decryptor.transition_to_key_ratchet(
            Some(Box::new(HashRatchet::new(b"new"))),
            Duration::from_secs(10),
        );
        assert_eq!(decryptor.active_ratchets(), 2);
        assert_eq!(open(&mut decryptor, &old_frames[0]).unwrap(), b"a");
        assert_eq!(open(&mut decryptor, &new_frames[0]).unwrap(), b"c");

        clock.advance(Duration::from_secs(10));
        assert_eq!(open(&mut decryptor, &old_frames[1]), Err(DecryptError::Authentication));
        assert_eq!(decryptor.active_ratchets(), 1);
    }

    #[test]
    fn transition_never_extends_expiry() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"old");

        decryptor.transition_to_key_ratchet(None, Duration::from_secs(1));
        decryptor.transition_to_key_ratchet(None, Duration::from_secs(60));

        clock.advance(Duration::from_secs(1));
        let frames = seal(b"old", &[b"a"]);
        assert_eq!(open(&mut decryptor, &frames[0]), Err(DecryptError::MissingKeyRatchet));
    }

    #[test]
    fn garbage_with_marker_is_malformed() {
        let clock = ManualClock::new();
        let mut decryptor = decryptor_with(&clock, b"sender");
        let mut frame = vec![0u8; 30];
        frame[27] = 99;
        frame[28..].copy_from_slice(&dave_proto::MAGIC_MARKER);

        assert!(matches!(open(&mut decryptor, &frame), Err(DecryptError::MalformedTrailer(_))));
    }

    #[test]
    fn old_generations_are_erased() {
        let mut manager = CryptorManager::new(Box::new(HashRatchet::new(b"s")));
        let config = DecryptorConfig::default();

        manager.record_success(&config, 0, 0);
        manager.record_success(&config, 3, 3 << 24);
        assert_eq!(manager.oldest_kept_generation, 2);
        assert_eq!(manager.newest_generation, 3);
    }

    #[test]
    fn missing_nonce_window_is_bounded() {
        let mut manager = CryptorManager::new(Box::new(HashRatchet::new(b"s")));
        let config = DecryptorConfig { max_missing_nonces: 4, ..DecryptorConfig::default() };

        manager.record_success(&config, 0, 0);
        manager.record_success(&config, 0, 100);
        assert_eq!(manager.missing_nonces.len(), 4);
        assert!(manager.can_process_nonce(99));
        assert!(!manager.can_process_nonce(50));
    }
}
