//! Cryptographic error types.

use dave_proto::{KeyGeneration, ProtocolVersion};
use thiserror::Error;

/// Errors from key ratchets, frame AEAD and key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key for this generation was already deleted.
    #[error("key for generation {generation} was erased")]
    KeyErased {
        /// Requested generation.
        generation: KeyGeneration,
    },

    /// Requested generation is too far ahead of the ratchet.
    #[error("generation {generation} exceeds ratchet window (next {next})")]
    GenerationTooFar {
        /// Requested generation.
        generation: KeyGeneration,
        /// Next generation the ratchet would derive.
        next: KeyGeneration,
    },

    /// Authentication failed or the cipher rejected its input.
    #[error("AEAD operation failed")]
    Aead,

    /// Key derivation function rejected its parameters or input.
    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// Protocol version has no key material definition.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(ProtocolVersion),

    /// Serialized key could not be loaded.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Input to code generation is shorter than the requested code.
    #[error("input data length {len} smaller than desired code length {target}")]
    CodeDataTooShort {
        /// Input length.
        len: usize,
        /// Requested code length.
        target: usize,
    },

    /// Requested code length is not a multiple of the group size.
    #[error("code length {target} must be a multiple of group size {group}")]
    CodeLengthNotMultiple {
        /// Requested code length.
        target: usize,
        /// Digits per group.
        group: usize,
    },

    /// Group size is zero or does not fit the 64-bit group arithmetic.
    #[error("group size must be between 1 and 7, got {0}")]
    CodeGroupSize(usize),
}

impl CryptoError {
    /// Returns true if the error means the key material was unavailable
    /// rather than that the ciphertext was bad.
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Self::KeyErased { .. } | Self::GenerationTooFar { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_classification() {
        assert!(CryptoError::KeyErased { generation: 1 }.is_missing_key());
        assert!(CryptoError::GenerationTooFar { generation: 300, next: 2 }.is_missing_key());
        assert!(!CryptoError::Aead.is_missing_key());
    }

    #[test]
    fn error_display() {
        let err = CryptoError::CodeLengthNotMultiple { target: 30, group: 4 };
        assert_eq!(err.to_string(), "code length 30 must be a multiple of group size 4");
    }
}
