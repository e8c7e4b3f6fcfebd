//! Property tests for key ratchets and frame sealing.

use dave_crypto::{
    EncryptionKey, HashRatchet, KeyRatchet, MAX_GENERATION_GAP,
    aead::{open_in_place, seal_in_place},
    generate_displayable_code,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn ratchet_is_deterministic(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        generation in 0u32..MAX_GENERATION_GAP,
    ) {
        let mut a = HashRatchet::new(&secret);
        let mut b = HashRatchet::new(&secret);
        prop_assert_eq!(a.get_key(generation).unwrap(), b.get_key(generation).unwrap());
    }

    #[test]
    fn lookup_order_does_not_matter(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        first in 0u32..64,
        second in 0u32..64,
    ) {
        let mut forward = HashRatchet::new(&secret);
        let mut direct = HashRatchet::new(&secret);

        forward.get_key(first).unwrap();
        let via_forward = forward.get_key(second).unwrap();
        let via_direct = direct.get_key(second).unwrap();
        prop_assert_eq!(via_forward, via_direct);
    }

    #[test]
    fn seal_open_recovers_plaintext(
        key in any::<[u8; 32]>(),
        nonce in any::<u32>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let key = EncryptionKey::from_bytes(key);
        let mut buffer = plaintext.clone();

        let tag = seal_in_place(&key, nonce, b"", &mut buffer).unwrap();
        open_in_place(&key, nonce, b"", &mut buffer, &tag).unwrap();
        prop_assert_eq!(buffer, plaintext);
    }

    #[test]
    fn tampered_ciphertext_is_rejected(
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        flip in any::<prop::sample::Index>(),
    ) {
        let key = EncryptionKey::from_bytes([5; 32]);
        let mut buffer = plaintext;
        let tag = seal_in_place(&key, 1, b"", &mut buffer).unwrap();

        let i = flip.index(buffer.len());
        buffer[i] ^= 0x01;
        prop_assert!(open_in_place(&key, 1, b"", &mut buffer, &tag).is_err());
    }

    #[test]
    fn displayable_code_has_requested_shape(
        data in prop::collection::vec(any::<u8>(), 45),
        group_size in 1usize..8,
        groups in 1usize..6,
    ) {
        let code = generate_displayable_code(&data, group_size * groups, group_size).unwrap();
        prop_assert_eq!(code.len(), group_size * groups);
        prop_assert!(code.bytes().all(|b| b.is_ascii_digit()));
    }
}
