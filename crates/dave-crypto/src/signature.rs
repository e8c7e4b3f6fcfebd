//! Long-term signature key pairs.
//!
//! Identity keys are Ed25519. They are persisted as JSON Web Keys (RFC 8037
//! `OKP` / `Ed25519`) so hosts can keep them next to other credentials.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use dave_proto::{ProtocolVersion, max_supported_protocol_version};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::CryptoError;

const JWK_KTY: &str = "OKP";
const JWK_CRV: &str = "Ed25519";

#[derive(Serialize, Deserialize)]
struct Jwk {
    kty: String,
    crv: String,
    d: String,
    x: String,
}

/// Ed25519 identity key pair.
#[derive(Clone)]
pub struct SignatureKeyPair {
    signing: SigningKey,
}

impl SignatureKeyPair {
    /// Generates a fresh key pair for `version`.
    pub fn generate(version: ProtocolVersion) -> Result<Self, CryptoError> {
        check_version(version)?;
        Ok(Self { signing: SigningKey::generate(&mut OsRng) })
    }

    /// Builds a key pair from a raw 32-byte secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self { signing: SigningKey::from_bytes(secret) }
    }

    /// Loads a key pair from its JWK serialization.
    pub fn load(version: ProtocolVersion, jwk: &str) -> Result<Self, CryptoError> {
        check_version(version)?;

        let jwk: Jwk = serde_json::from_str(jwk)
            .map_err(|e| CryptoError::InvalidKey(format!("malformed JWK: {e}")))?;
        if jwk.kty != JWK_KTY || jwk.crv != JWK_CRV {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported key type {}/{}",
                jwk.kty, jwk.crv
            )));
        }

        let secret = Zeroizing::new(decode_32(&jwk.d, "d")?);
        let signing = SigningKey::from_bytes(&secret);

        let public = decode_32(&jwk.x, "x")?;
        if signing.verifying_key().as_bytes() != &public {
            return Err(CryptoError::InvalidKey("public key does not match private key".into()));
        }

        Ok(Self { signing })
    }

    /// Serializes the key pair as a JWK string.
    pub fn dump(&self, version: ProtocolVersion) -> Result<String, CryptoError> {
        check_version(version)?;

        let secret = Zeroizing::new(self.signing.to_bytes());
        let jwk = Jwk {
            kty: JWK_KTY.to_owned(),
            crv: JWK_CRV.to_owned(),
            d: URL_SAFE_NO_PAD.encode(secret.as_slice()),
            x: URL_SAFE_NO_PAD.encode(self.public_key()),
        };
        serde_json::to_string(&jwk).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Public half of the key pair.
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key().to_bytes()
    }

    /// Verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }
}

impl fmt::Debug for SignatureKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureKeyPair")
            .field("public", &hex_prefix(&self.public_key()))
            .finish_non_exhaustive()
    }
}

fn check_version(version: ProtocolVersion) -> Result<(), CryptoError> {
    if version == 0 || version > max_supported_protocol_version() {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    Ok(())
}

fn decode_32(value: &str, field: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|e| CryptoError::InvalidKey(format!("bad base64 in {field}: {e}")))?,
    );
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("{field} must be 32 bytes, got {}", bytes.len())))
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
