//! Dave Cryptographic Primitives
//!
//! This crate provides the cryptographic building blocks used by the frame
//! encryptor, the frame decryptor and session engines.
//!
//! # Design
//!
//! Functions here are pure or own all of their state. Nothing in this crate
//! spawns threads or touches global state; callers decide where expensive
//! work (the pairwise fingerprint KDF) runs.
//!
//! # Components
//!
//! - [`KeyRatchet`] / [`HashRatchet`]: per-sender key chain indexed by
//!   generation
//! - [`aead`]: in-place frame sealing and opening
//! - [`fingerprint`]: pairwise verification fingerprints and displayable
//!   codes
//! - [`SignatureKeyPair`]: Ed25519 identity keys with JWK import/export

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
mod error;
pub mod fingerprint;
pub mod ratchet;
mod signature;

pub use error::CryptoError;
pub use fingerprint::{FingerprintParams, generate_displayable_code, pairwise_fingerprint};
pub use ratchet::{
    EncryptionKey, HashRatchet, KeyRatchet, MAX_GENERATION_GAP, derive_sender_base_secret,
};
pub use signature::SignatureKeyPair;
