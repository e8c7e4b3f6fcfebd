//! Key ratchets.
//!
//! A key ratchet turns one base secret into a chain of frame keys. Every
//! generation has its own key; the chain only moves forward, and keys are
//! erased once the caller no longer needs them.
//!
//! # Security
//!
//! - Forward secrecy within a sender: the chain secret is replaced on every
//!   step, so erased keys cannot be re-derived from the ratchet state
//! - Sender isolation: base secrets are derived per user from the epoch
//!   secret via [`derive_sender_base_secret`]

use std::{collections::BTreeMap, fmt};

use dave_proto::KeyGeneration;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::CryptoError;

/// Maximum number of generations a ratchet derives ahead in one request.
pub const MAX_GENERATION_GAP: KeyGeneration = 250;

const KEY_SIZE: usize = 32;
const RATCHET_SALT: &[u8] = b"dave hash ratchet v1";
const KEY_LABEL: &[u8] = b"key";
const SECRET_LABEL: &[u8] = b"secret";
const SENDER_LABEL: &[u8] = b"dave sender base secret v1";

/// Symmetric key for one ratchet generation.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Source of per-generation frame keys.
///
/// Implementations are opaque to everything above the engine: encryptors and
/// decryptors only ask for keys by generation and tell the ratchet when a
/// generation is no longer needed.
pub trait KeyRatchet: Send {
    /// Returns the key for `generation`, deriving forward if needed.
    fn get_key(&mut self, generation: KeyGeneration) -> Result<EncryptionKey, CryptoError>;

    /// Erases the key for `generation`.
    fn delete_key(&mut self, generation: KeyGeneration);
}

/// HKDF-SHA256 hash ratchet.
///
/// ```text
/// secret[0] = HKDF-Extract(salt, base_secret)
/// key[n]    = HKDF-Expand(secret[n], "key")
/// secret[n+1] = HKDF-Expand(secret[n], "secret")
/// ```
///
/// Keys derived on the way to a later generation are cached so frames that
/// arrive out of order can still be opened until the caller deletes them.
pub struct HashRatchet {
    next_secret: Zeroizing<[u8; KEY_SIZE]>,
    next_generation: KeyGeneration,
    keys: BTreeMap<KeyGeneration, EncryptionKey>,
}

impl HashRatchet {
    /// Creates a ratchet positioned at generation 0.
    pub fn new(base_secret: &[u8]) -> Self {
        let (prk, _) = Hkdf::<Sha256>::extract(Some(RATCHET_SALT), base_secret);
        let mut next_secret = Zeroizing::new([0u8; KEY_SIZE]);
        next_secret.copy_from_slice(&prk);

        Self { next_secret, next_generation: 0, keys: BTreeMap::new() }
    }

    /// Next generation that has not been derived yet.
    pub fn next_generation(&self) -> KeyGeneration {
        self.next_generation
    }

    /// Number of derived keys still held.
    pub fn cached_keys(&self) -> usize {
        self.keys.len()
    }

    fn advance(&mut self) -> Result<(), CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, self.next_secret.as_slice());

        let mut key = [0u8; KEY_SIZE];
        hk.expand(KEY_LABEL, &mut key).map_err(|e| CryptoError::Kdf(e.to_string()))?;

        let mut next = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(SECRET_LABEL, next.as_mut_slice()).map_err(|e| CryptoError::Kdf(e.to_string()))?;

        let generation = self.next_generation;
        self.next_generation = generation
            .checked_add(1)
            .ok_or(CryptoError::GenerationTooFar { generation, next: generation })?;

        self.keys.insert(generation, EncryptionKey(key));
        key.zeroize();
        self.next_secret = next;
        Ok(())
    }
}

impl KeyRatchet for HashRatchet {
    fn get_key(&mut self, generation: KeyGeneration) -> Result<EncryptionKey, CryptoError> {
        if let Some(key) = self.keys.get(&generation) {
            return Ok(key.clone());
        }

        if generation < self.next_generation {
            return Err(CryptoError::KeyErased { generation });
        }

        if generation - self.next_generation > MAX_GENERATION_GAP {
            return Err(CryptoError::GenerationTooFar { generation, next: self.next_generation });
        }

        while self.next_generation <= generation {
            self.advance()?;
        }

        self.keys.get(&generation).cloned().ok_or(CryptoError::KeyErased { generation })
    }

    fn delete_key(&mut self, generation: KeyGeneration) {
        self.keys.remove(&generation);
    }
}

impl fmt::Debug for HashRatchet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRatchet")
            .field("next_generation", &self.next_generation)
            .field("cached_keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

/// Derives the ratchet base secret for one sender from an epoch secret.
pub fn derive_sender_base_secret(
    epoch_secret: &[u8],
    user_id: u64,
) -> Result<[u8; KEY_SIZE], CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, epoch_secret);

    let mut info = Vec::with_capacity(SENDER_LABEL.len() + 8);
    info.extend_from_slice(SENDER_LABEL);
    info.extend_from_slice(&user_id.to_le_bytes());

    let mut out = [0u8; KEY_SIZE];
    hk.expand(&info, &mut out).map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(out)
}
