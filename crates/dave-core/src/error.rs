//! Frame engine result codes.

use dave_crypto::CryptoError;
use dave_proto::ProtoError;
use thiserror::Error;

/// Why a frame could not be encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptError {
    /// No key ratchet is installed and passthrough is off.
    #[error("no key ratchet installed")]
    MissingKeyRatchet,

    /// Ratchet could not produce the key for the current generation.
    #[error("missing key: {0}")]
    MissingKey(CryptoError),

    /// Output buffer is smaller than the reported upper bound.
    #[error("output buffer too small: need {needed}, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes provided.
        available: usize,
    },

    /// Every nonce for the installed ratchet has been used.
    #[error("nonce space exhausted")]
    NonceExhausted,

    /// Cipher failed to seal the frame.
    #[error("encryption failed: {0}")]
    Crypto(CryptoError),

    /// Trailer for the frame's unencrypted ranges could not be encoded.
    #[error("trailer encoding failed: {0}")]
    Trailer(ProtoError),

    /// Every sealing attempt formed a start code in the output.
    #[error("sealed frame failed validation after {attempts} attempts")]
    CiphertextValidation {
        /// Sealing attempts made.
        attempts: u64,
    },
}

impl EncryptError {
    /// Returns true if the failure was caused by absent key material.
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Self::MissingKeyRatchet | Self::MissingKey(_))
    }
}

/// Why a frame could not be decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    /// Frame has no trailer and passthrough is not allowed.
    #[error("unencrypted frame while passthrough is not allowed")]
    PassthroughNotAllowed,

    /// Frame has no trailer-shaped suffix and no key ratchet is installed.
    #[error("no key ratchet installed")]
    MissingKeyRatchet,

    /// Trailer could not be parsed.
    #[error("malformed trailer: {0}")]
    MalformedTrailer(#[from] ProtoError),

    /// Nonce was already processed or fell out of the replay window.
    #[error("invalid nonce {0}")]
    InvalidNonce(u32),

    /// No installed ratchet had the key for the frame's generation.
    #[error("missing key: {0}")]
    MissingKey(CryptoError),

    /// Authentication failed under every candidate key.
    #[error("authentication failed")]
    Authentication,

    /// Output buffer is smaller than the frame body.
    #[error("output buffer too small: need {needed}, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes provided.
        available: usize,
    },
}

impl DecryptError {
    /// Returns true if the failure was caused by absent key material.
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Self::MissingKeyRatchet | Self::MissingKey(_))
    }
}
