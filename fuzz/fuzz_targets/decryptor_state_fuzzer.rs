//! Fuzz target for the [`FrameDecryptor`] state machine
//!
//! Prevent replay acceptance and plaintext leaks across ratchet transitions
//!
//! # Strategy
//!
//! - Sender: one encryptor sealing fuzzed frames under the current epoch,
//!   on streams mapped to Opus, VP8 and H.264 so clear ranges are exercised
//! - Delivery: frames delivered in any order, any number of times
//! - Corruption: single-byte flips anywhere in a sealed frame
//! - Transitions: epoch rotations and passthrough toggles with fuzzed
//!   expiries, and clock advances across them
//!
//! # Invariants
//!
//! - A sealed frame decrypts at most once
//! - A successful decrypt of a sealed frame returns its plaintext
//! - A corrupted frame never decrypts to anything but passthrough output
//! - Unencrypted frames pass only while passthrough is allowed
//! - NEVER panic on any input

#![no_main]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use arbitrary::Arbitrary;
use dave_core::{DecryptError, DecryptorConfig, Environment, FrameDecryptor, FrameEncryptor};
use dave_crypto::HashRatchet;
use dave_proto::{Codec, MediaType, MAX_TRAILER_SIZE};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone)]
struct FuzzClock(Arc<Mutex<Instant>>);

impl FuzzClock {
    fn advance(&self, by: Duration) {
        *self.0.lock().expect("clock lock") += by;
    }
}

impl Environment for FuzzClock {
    fn now(&self) -> Instant {
        *self.0.lock().expect("clock lock")
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0);
    }
}

#[derive(Debug, Arbitrary)]
enum DecryptorEvent {
    Seal { plaintext: Vec<u8>, stream: u8 },
    Deliver { index: u8 },
    Corrupt { index: u8, position: u16, flip: u8 },
    Plain(Vec<u8>),
    Rotate { expiry_secs: u8 },
    Passthrough { enabled: bool, expiry_secs: u8 },
    Advance { secs: u8 },
}

const STREAMS: [(u32, Codec); 3] = [(1, Codec::Opus), (2, Codec::Vp8), (3, Codec::H264)];

struct Sealed {
    frame: Vec<u8>,
    plaintext: Vec<u8>,
}

fuzz_target!(|events: Vec<DecryptorEvent>| {
    let clock = FuzzClock(Arc::new(Mutex::new(Instant::now())));
    let mut epoch: u32 = 0;

    let mut encryptor = FrameEncryptor::new(clock.clone());
    encryptor.set_key_ratchet(Some(Box::new(HashRatchet::new(&epoch.to_le_bytes()))));
    for (ssrc, codec) in STREAMS {
        encryptor.assign_ssrc_to_codec(ssrc, codec);
    }
    let mut decryptor = FrameDecryptor::new(clock.clone(), DecryptorConfig::default());
    decryptor.transition_to_key_ratchet(
        Some(Box::new(HashRatchet::new(&epoch.to_le_bytes()))),
        Duration::ZERO,
    );

    let mut sealed: Vec<Sealed> = Vec::new();
    let mut opened: HashSet<usize> = HashSet::new();
    let mut passthrough = false;
    let mut passthrough_until: Option<Instant> = None;

    for event in events {
        match event {
            DecryptorEvent::Seal { plaintext, stream } => {
                let (ssrc, _) = STREAMS[usize::from(stream) % STREAMS.len()];
                let mut out = vec![0u8; plaintext.len() + MAX_TRAILER_SIZE];
                if let Ok(len) = encryptor.encrypt(MediaType::Audio, ssrc, &plaintext, &mut out) {
                    out.truncate(len);
                    sealed.push(Sealed { frame: out, plaintext });
                }
            },

            DecryptorEvent::Deliver { index } => {
                if sealed.is_empty() {
                    continue;
                }
                let i = usize::from(index) % sealed.len();
                let mut out = vec![0u8; sealed[i].frame.len()];
                match decryptor.decrypt(MediaType::Audio, &sealed[i].frame, &mut out) {
                    Ok(len) => {
                        assert!(opened.insert(i), "frame {i} decrypted twice");
                        assert_eq!(&out[..len], sealed[i].plaintext.as_slice());
                    },
                    Err(
                        DecryptError::InvalidNonce(_)
                        | DecryptError::MissingKey(_)
                        | DecryptError::MissingKeyRatchet
                        | DecryptError::Authentication,
                    ) => {},
                    Err(e) => panic!("sealed frame rejected unexpectedly: {e}"),
                }
            },

            DecryptorEvent::Corrupt { index, position, flip } => {
                if sealed.is_empty() || flip == 0 {
                    continue;
                }
                let i = usize::from(index) % sealed.len();
                let mut frame = sealed[i].frame.clone();
                let at = usize::from(position) % frame.len();
                frame[at] ^= flip;

                let mut out = vec![0u8; frame.len()];
                if let Ok(len) = decryptor.decrypt(MediaType::Audio, &frame, &mut out) {
                    assert_eq!(&out[..len], frame.as_slice(), "corrupted frame decrypted");
                }
            },

            DecryptorEvent::Plain(frame) => {
                let now = clock.now();
                let allowed = passthrough || passthrough_until.is_some_and(|until| now < until);
                let mut out = vec![0u8; frame.len()];
                let result = decryptor.decrypt(MediaType::Audio, &frame, &mut out);
                if !allowed {
                    assert!(
                        result.is_err() || dave_proto::EncryptedFrame::parse(&frame).is_ok(),
                        "plaintext passed with passthrough closed"
                    );
                }
            },

            DecryptorEvent::Rotate { expiry_secs } => {
                epoch += 1;
                encryptor.set_key_ratchet(Some(Box::new(HashRatchet::new(&epoch.to_le_bytes()))));
                decryptor.transition_to_key_ratchet(
                    Some(Box::new(HashRatchet::new(&epoch.to_le_bytes()))),
                    Duration::from_secs(u64::from(expiry_secs % 30)),
                );
            },

            DecryptorEvent::Passthrough { enabled, expiry_secs } => {
                let expiry = Duration::from_secs(u64::from(expiry_secs % 30));
                decryptor.transition_to_passthrough_mode(enabled, expiry);
                if enabled {
                    passthrough = true;
                    passthrough_until = None;
                } else if passthrough {
                    passthrough = false;
                    passthrough_until = Some(clock.now() + expiry);
                } else if let Some(until) = passthrough_until {
                    passthrough_until = Some(until.min(clock.now() + expiry));
                }
            },

            DecryptorEvent::Advance { secs } => {
                clock.advance(Duration::from_secs(u64::from(secs % 60)));
            },
        }
    }
});
