//! In-place frame AEAD.
//!
//! Frames are sealed with ChaCha20-Poly1305. The 96-bit nonce is the
//! truncated frame nonce in the low 32 bits (little-endian) with the upper
//! 64 bits zero; uniqueness comes from each sender's key changing every
//! generation and the counter never repeating within one.

use chacha20poly1305::{
    ChaCha20Poly1305, Key, KeyInit, Nonce, Tag,
    aead::AeadInPlace,
};
use dave_proto::{TAG_SIZE, TruncatedNonce};

use crate::{CryptoError, EncryptionKey};

/// Size of the expanded AEAD nonce.
pub const NONCE_SIZE: usize = 12;

/// Expands a truncated frame nonce into a full AEAD nonce.
pub fn frame_nonce(truncated_nonce: TruncatedNonce) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[NONCE_SIZE - 4..].copy_from_slice(&truncated_nonce.to_le_bytes());
    nonce
}

/// Encrypts `buffer` in place and returns the detached tag.
pub fn seal_in_place(
    key: &EncryptionKey,
    truncated_nonce: TruncatedNonce,
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<[u8; TAG_SIZE], CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = frame_nonce(truncated_nonce);

    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buffer)
        .map_err(|_| CryptoError::Aead)?;

    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

/// Decrypts `buffer` in place after verifying `tag`.
///
/// On failure the buffer contents are unspecified and must be discarded.
pub fn open_in_place(
    key: &EncryptionKey,
    truncated_nonce: TruncatedNonce,
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8; TAG_SIZE],
) -> Result<(), CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = frame_nonce(truncated_nonce);

    cipher
        .decrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buffer, Tag::from_slice(tag))
        .map_err(|_| CryptoError::Aead)
}
