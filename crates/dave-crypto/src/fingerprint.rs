//! Pairwise verification fingerprints.
//!
//! Two participants compare a fingerprint derived from both of their
//! signature keys to detect an interposed party. The derivation is
//! deliberately memory-hard (Argon2id), so it should run off any latency
//! sensitive thread.
//!
//! The fingerprint is symmetric: both sides sort the two per-user inputs
//! before hashing, so Alice and Bob compute the same bytes.

use argon2::{Algorithm, Argon2, Params, Version};
use dave_proto::ProtocolVersion;
use serde::{Deserialize, Serialize};

use crate::CryptoError;

/// Fixed salt for pairwise fingerprints.
pub const FINGERPRINT_SALT: [u8; 16] = [
    0x24, 0xca, 0xb1, 0x7a, 0x7a, 0xf8, 0xec, 0x2b, 0x82, 0xb4, 0x12, 0xb9, 0x2d, 0xab, 0x19, 0x2e,
];

/// Argon2id cost parameters for fingerprint derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
    /// Output length in bytes.
    pub output_len: usize,
}

impl Default for FingerprintParams {
    fn default() -> Self {
        Self { memory_kib: 16 * 1024, iterations: 2, parallelism: 2, output_len: 64 }
    }
}

impl FingerprintParams {
    /// Cheap parameters for tests and simulation.
    pub fn light() -> Self {
        Self { memory_kib: 64, iterations: 1, parallelism: 1, output_len: 64 }
    }
}

/// Serializes one participant's contribution to a fingerprint.
///
/// Layout: `version (u16 BE) || signature key || user id (u64 BE)`.
pub fn fingerprint_key(version: ProtocolVersion, signature_key: &[u8], user_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + signature_key.len() + 8);
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(signature_key);
    out.extend_from_slice(&user_id.to_be_bytes());
    out
}

/// Derives the pairwise fingerprint between two participants.
///
/// `local` and `remote` are `(user id, signature key)` pairs. The result
/// does not depend on which side is local.
pub fn pairwise_fingerprint(
    params: &FingerprintParams,
    version: ProtocolVersion,
    local: (u64, &[u8]),
    remote: (u64, &[u8]),
) -> Result<Vec<u8>, CryptoError> {
    let mut keys =
        [fingerprint_key(version, local.1, local.0), fingerprint_key(version, remote.1, remote.0)];
    keys.sort();
    let input = keys.concat();

    let argon_params =
        Params::new(params.memory_kib, params.iterations, params.parallelism, Some(params.output_len))
            .map_err(|e| CryptoError::Kdf(format!("invalid Argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = vec![0u8; params.output_len];
    argon2
        .hash_password_into(&input, &FINGERPRINT_SALT, &mut out)
        .map_err(|e| CryptoError::Kdf(format!("Argon2 derivation failed: {e}")))?;
    Ok(out)
}

/// Renders bytes as a decimal code for out-of-band comparison.
///
/// The first `target_length` bytes are split into groups of `group_size`
/// bytes; each group is read as a big-endian integer, reduced modulo
/// `10^group_size` and zero-padded to `group_size` digits.
pub fn generate_displayable_code(
    data: &[u8],
    target_length: usize,
    group_size: usize,
) -> Result<String, CryptoError> {
    if data.len() < target_length {
        return Err(CryptoError::CodeDataTooShort { len: data.len(), target: target_length });
    }
    if group_size == 0 || group_size >= 8 {
        return Err(CryptoError::CodeGroupSize(group_size));
    }
    if target_length % group_size != 0 {
        return Err(CryptoError::CodeLengthNotMultiple { target: target_length, group: group_size });
    }

    // group_size < 8 keeps the exponent in range.
    #[allow(clippy::cast_possible_truncation)]
    let modulo = 10u64.pow(group_size as u32);

    let mut code = String::with_capacity(target_length);
    for chunk in data[..target_length].chunks(group_size) {
        let value = chunk.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)) % modulo;
        code.push_str(&format!("{value:0group_size$}"));
    }
    Ok(code)
}
