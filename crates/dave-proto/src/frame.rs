//! Encrypted frame trailer codec.
//!
//! The trailer is appended to the body of every encrypted media frame. It
//! carries the AEAD tag, the truncated nonce the receiver needs to pick the
//! right key generation, and the ranges of the body left unencrypted.
//!
//! # Invariants
//!
//! - Round trip: `parse(encode(t)) == t` for every trailer
//! - Canonical: a nonce or range has exactly one accepted ULEB128 encoding
//! - Parsed ranges are ordered, non-empty and inside the body
//! - Total: parsing arbitrary bytes returns an error, never panics

use std::fmt;

use crate::ProtoError;

/// Two bytes ending every encrypted frame.
pub const MAGIC_MARKER: [u8; 2] = [0xFA, 0xFA];

/// Size of the AEAD authentication tag.
pub const TAG_SIZE: usize = 16;

/// Number of low nonce bits that count frames within one generation.
pub const GENERATION_SHIFT_BITS: u32 = 24;

const MAX_ULEB128_SIZE: usize = 5;
const SUPPLEMENTAL_SIZE_BYTES: usize = 1;
const MIN_TRAILER_SIZE: usize = TAG_SIZE + 1 + SUPPLEMENTAL_SIZE_BYTES + MAGIC_MARKER.len();

/// Largest trailer the encoder can produce. The size byte caps it.
pub const MAX_TRAILER_SIZE: usize = 255;

/// Per-sender frame counter carried in the trailer.
pub type TruncatedNonce = u32;

/// Index of a key in a key ratchet.
pub type KeyGeneration = u32;

/// Key generation a truncated nonce belongs to.
pub const fn generation_of(nonce: TruncatedNonce) -> KeyGeneration {
    nonce >> GENERATION_SHIFT_BITS
}

/// Whether a frame carries an encryption trailer.
///
/// This only checks framing; the trailer may still fail to parse.
pub fn is_encrypted(frame: &[u8]) -> bool {
    frame.len() >= MIN_TRAILER_SIZE && frame.ends_with(&MAGIC_MARKER)
}

/// Number of bytes `value` occupies as ULEB128.
pub fn uleb128_len(mut value: u32) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Writes `value` as ULEB128 into the front of `out`.
pub fn write_uleb128(mut value: u32, out: &mut [u8]) -> Result<usize, ProtoError> {
    let needed = uleb128_len(value);
    if out.len() < needed {
        return Err(ProtoError::BufferTooSmall { needed, available: out.len() });
    }

    for slot in out.iter_mut().take(needed) {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        *slot = if value == 0 { byte } else { byte | 0x80 };
    }

    Ok(needed)
}

/// Reads a canonical ULEB128 value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn read_uleb128(bytes: &[u8]) -> Result<(u32, usize), ProtoError> {
    let mut value: u64 = 0;

    for (i, &byte) in bytes.iter().enumerate().take(MAX_ULEB128_SIZE) {
        // Over-long encodings end in a zero continuation byte.
        if i > 0 && byte == 0 {
            return Err(ProtoError::MalformedUleb128);
        }

        value |= u64::from(byte & 0x7f) << (7 * i);

        if byte & 0x80 == 0 {
            let value = u32::try_from(value).map_err(|_| ProtoError::MalformedUleb128)?;
            return Ok((value, i + 1));
        }
    }

    Err(ProtoError::MalformedUleb128)
}

/// Span of the frame body that is authenticated but not encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnencryptedRange {
    /// First byte of the range.
    pub offset: usize,
    /// Length of the range in bytes.
    pub size: usize,
}

impl UnencryptedRange {
    /// One past the last byte of the range.
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Checks that `ranges` are ordered, non-empty and end within `body_len`.
pub fn validate_ranges(ranges: &[UnencryptedRange], body_len: usize) -> Result<(), ProtoError> {
    let mut cursor = 0;
    for range in ranges {
        let end = range.offset.checked_add(range.size).ok_or(ProtoError::InvalidRanges)?;
        if range.size == 0 || range.offset < cursor || end > body_len {
            return Err(ProtoError::InvalidRanges);
        }
        cursor = end;
    }
    Ok(())
}

/// Splits `body` into the bytes inside `ranges` and the bytes outside them.
///
/// Returns `(clear, protected)`. `ranges` must pass [`validate_ranges`] for
/// `body`.
pub fn split_ranges(body: &[u8], ranges: &[UnencryptedRange]) -> (Vec<u8>, Vec<u8>) {
    let clear_len: usize = ranges.iter().map(|range| range.size).sum();
    let mut clear = Vec::with_capacity(clear_len);
    let mut protected = Vec::with_capacity(body.len() - clear_len);

    let mut cursor = 0;
    for range in ranges {
        protected.extend_from_slice(&body[cursor..range.offset]);
        clear.extend_from_slice(&body[range.offset..range.end()]);
        cursor = range.end();
    }
    protected.extend_from_slice(&body[cursor..]);

    (clear, protected)
}

/// Inverse of [`split_ranges`]: writes `clear` and `protected` back into
/// their positions in `out`, returning the body length.
///
/// `out` must hold `clear.len() + protected.len()` bytes.
pub fn join_ranges(
    ranges: &[UnencryptedRange],
    clear: &[u8],
    protected: &[u8],
    out: &mut [u8],
) -> usize {
    let (mut from_clear, mut from_protected, mut pos) = (0, 0, 0);

    for range in ranges {
        let gap = range.offset - pos;
        out[pos..range.offset].copy_from_slice(&protected[from_protected..from_protected + gap]);
        from_protected += gap;

        out[range.offset..range.end()]
            .copy_from_slice(&clear[from_clear..from_clear + range.size]);
        from_clear += range.size;
        pos = range.end();
    }

    let rest = &protected[from_protected..];
    out[pos..pos + rest.len()].copy_from_slice(rest);
    pos + rest.len()
}

fn range_value(value: usize) -> Result<u32, ProtoError> {
    u32::try_from(value).map_err(|_| ProtoError::InvalidRanges)
}

/// Tag, nonce and unencrypted ranges appended to an encrypted frame.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameTrailer {
    /// AEAD authentication tag.
    pub tag: [u8; TAG_SIZE],
    /// Truncated nonce used for this frame.
    pub truncated_nonce: TruncatedNonce,
    /// Body ranges left unencrypted, in order.
    pub unencrypted_ranges: Vec<UnencryptedRange>,
}

impl FrameTrailer {
    /// Bytes this trailer occupies when encoded.
    pub fn encoded_len(&self) -> usize {
        let ranges: usize = self
            .unencrypted_ranges
            .iter()
            .map(|range| {
                let offset = range_value(range.offset).unwrap_or(u32::MAX);
                let size = range_value(range.size).unwrap_or(u32::MAX);
                uleb128_len(offset) + uleb128_len(size)
            })
            .sum();

        TAG_SIZE
            + uleb128_len(self.truncated_nonce)
            + ranges
            + SUPPLEMENTAL_SIZE_BYTES
            + MAGIC_MARKER.len()
    }

    /// Key generation of the frame.
    pub fn generation(&self) -> KeyGeneration {
        generation_of(self.truncated_nonce)
    }

    /// Encodes the trailer into the front of `out`.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<usize, ProtoError> {
        let len = self.encoded_len();
        let size = u8::try_from(len).map_err(|_| ProtoError::TrailerTooLarge(len))?;
        if out.len() < len {
            return Err(ProtoError::BufferTooSmall { needed: len, available: out.len() });
        }

        out[..TAG_SIZE].copy_from_slice(&self.tag);
        let mut pos = TAG_SIZE;
        pos += write_uleb128(self.truncated_nonce, &mut out[pos..])?;
        for range in &self.unencrypted_ranges {
            pos += write_uleb128(range_value(range.offset)?, &mut out[pos..])?;
            pos += write_uleb128(range_value(range.size)?, &mut out[pos..])?;
        }

        out[pos] = size;
        pos += SUPPLEMENTAL_SIZE_BYTES;

        out[pos..pos + MAGIC_MARKER.len()].copy_from_slice(&MAGIC_MARKER);
        Ok(len)
    }
}

impl fmt::Debug for FrameTrailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTrailer")
            .field("truncated_nonce", &self.truncated_nonce)
            .field("generation", &self.generation())
            .field("unencrypted_ranges", &self.unencrypted_ranges)
            .finish_non_exhaustive()
    }
}

/// Borrowed view of an encrypted frame split into body and trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFrame<'a> {
    /// Ciphertext with the unencrypted ranges in place.
    pub body: &'a [u8],
    /// Parsed trailer.
    pub trailer: FrameTrailer,
}

impl<'a> EncryptedFrame<'a> {
    /// Splits an encrypted frame into body and trailer.
    pub fn parse(frame: &'a [u8]) -> Result<Self, ProtoError> {
        let len = frame.len();
        if len < MIN_TRAILER_SIZE {
            return Err(ProtoError::FrameTooShort { len });
        }
        if !frame.ends_with(&MAGIC_MARKER) {
            return Err(ProtoError::MissingMarker);
        }

        let size = usize::from(frame[len - MAGIC_MARKER.len() - SUPPLEMENTAL_SIZE_BYTES]);
        if size < MIN_TRAILER_SIZE || size > len {
            return Err(ProtoError::InvalidSupplementalSize { size, len });
        }

        let (body, trailer) = frame.split_at(len - size);

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&trailer[..TAG_SIZE]);

        let mut region = &trailer[TAG_SIZE..size - SUPPLEMENTAL_SIZE_BYTES - MAGIC_MARKER.len()];
        let (truncated_nonce, used) = read_uleb128(region)?;
        region = &region[used..];

        let mut unencrypted_ranges = Vec::new();
        while !region.is_empty() {
            let (offset, used) = read_uleb128(region)?;
            region = &region[used..];
            let (size, used) = read_uleb128(region)?;
            region = &region[used..];

            unencrypted_ranges.push(UnencryptedRange {
                offset: usize::try_from(offset).map_err(|_| ProtoError::InvalidRanges)?,
                size: usize::try_from(size).map_err(|_| ProtoError::InvalidRanges)?,
            });
        }
        validate_ranges(&unencrypted_ranges, body.len())?;

        Ok(Self { body, trailer: FrameTrailer { tag, truncated_nonce, unencrypted_ranges } })
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn uleb128_known_vectors() {
        let cases: [(u32, &[u8]); 5] = [
            (0, &hex!("00")),
            (127, &hex!("7f")),
            (128, &hex!("8001")),
            (624_485, &hex!("e58e26")),
            (u32::MAX, &hex!("ffffffff0f")),
        ];

        for (value, encoded) in cases {
            let mut buf = [0u8; 5];
            let written = write_uleb128(value, &mut buf).unwrap();
            assert_eq!(&buf[..written], encoded);
            assert_eq!(read_uleb128(encoded).unwrap(), (value, encoded.len()));
        }
    }

    #[test]
    fn uleb128_rejects_overlong_and_truncated() {
        assert_eq!(read_uleb128(&hex!("8000")), Err(ProtoError::MalformedUleb128));
        assert_eq!(read_uleb128(&hex!("80")), Err(ProtoError::MalformedUleb128));
        assert_eq!(read_uleb128(&hex!("ffffffff1f")), Err(ProtoError::MalformedUleb128));
        assert_eq!(read_uleb128(&[]), Err(ProtoError::MalformedUleb128));
    }

    #[test]
    fn uleb128_write_needs_room() {
        let mut buf = [0u8; 1];
        assert_eq!(
            write_uleb128(300, &mut buf),
            Err(ProtoError::BufferTooSmall { needed: 2, available: 1 })
        );
    }

    #[test]
    fn trailer_layout() {
        let trailer = FrameTrailer {
            tag: [0xAB; TAG_SIZE],
            truncated_nonce: 0x0100_0001,
            unencrypted_ranges: Vec::new(),
        };
        let mut buf = [0u8; MAX_TRAILER_SIZE];
        let len = trailer.encode_into(&mut buf).unwrap();

        assert_eq!(len, trailer.encoded_len());
        assert_eq!(&buf[len - 2..len], &MAGIC_MARKER);
        assert_eq!(usize::from(buf[len - 3]), len);
        assert_eq!(trailer.generation(), 1);
    }

    #[test]
    fn parse_splits_body() {
        let trailer =
            FrameTrailer { tag: [7; TAG_SIZE], truncated_nonce: 42, unencrypted_ranges: Vec::new() };
        let mut frame = b"ciphertext".to_vec();
        let mut buf = [0u8; MAX_TRAILER_SIZE];
        let len = trailer.encode_into(&mut buf).unwrap();
        frame.extend_from_slice(&buf[..len]);

        let parsed = EncryptedFrame::parse(&frame).unwrap();
        assert_eq!(parsed.body, b"ciphertext");
        assert_eq!(parsed.trailer, trailer);
        assert!(is_encrypted(&frame));
    }

    #[test]
    fn ranges_follow_the_nonce() {
        let trailer = FrameTrailer {
            tag: [0; TAG_SIZE],
            truncated_nonce: 1,
            unencrypted_ranges: vec![
                UnencryptedRange { offset: 0, size: 10 },
                UnencryptedRange { offset: 200, size: 3 },
            ],
        };
        let mut buf = [0u8; MAX_TRAILER_SIZE];
        let len = trailer.encode_into(&mut buf).unwrap();

        assert_eq!(&buf[TAG_SIZE..len - 3], &hex!("01 00 0a c801 03"));
        assert_eq!(usize::from(buf[len - 3]), len);

        let mut frame = vec![0u8; 203];
        frame.extend_from_slice(&buf[..len]);
        assert_eq!(EncryptedFrame::parse(&frame).unwrap().trailer, trailer);
    }

    #[test]
    fn parse_rejects_ranges_past_the_body() {
        let trailer = FrameTrailer {
            tag: [0; TAG_SIZE],
            truncated_nonce: 0,
            unencrypted_ranges: vec![UnencryptedRange { offset: 2, size: 4 }],
        };
        let mut buf = [0u8; MAX_TRAILER_SIZE];
        let len = trailer.encode_into(&mut buf).unwrap();

        let mut frame = vec![0u8; 5];
        frame.extend_from_slice(&buf[..len]);
        assert_eq!(EncryptedFrame::parse(&frame), Err(ProtoError::InvalidRanges));
    }

    #[test]
    fn range_validation() {
        let range = |offset, size| UnencryptedRange { offset, size };

        assert!(validate_ranges(&[range(0, 2), range(2, 2)], 4).is_ok());
        assert_eq!(validate_ranges(&[range(0, 0)], 4), Err(ProtoError::InvalidRanges));
        assert_eq!(validate_ranges(&[range(2, 1), range(1, 1)], 4), Err(ProtoError::InvalidRanges));
        assert_eq!(validate_ranges(&[range(usize::MAX, 2)], 4), Err(ProtoError::InvalidRanges));
    }

    #[test]
    fn split_and_join_restore_the_body() {
        let body = b"HHpayloadHHHtail";
        let ranges = [UnencryptedRange { offset: 0, size: 2 }, UnencryptedRange { offset: 9, size: 3 }];

        let (clear, protected) = split_ranges(body, &ranges);
        assert_eq!(clear, b"HHHHH");
        assert_eq!(protected, b"payloadtail");

        let mut out = [0u8; 16];
        assert_eq!(join_ranges(&ranges, &clear, &protected, &mut out), body.len());
        assert_eq!(&out, body);
    }

    #[test]
    fn oversized_trailer_is_rejected() {
        let trailer = FrameTrailer {
            tag: [0; TAG_SIZE],
            truncated_nonce: 0,
            unencrypted_ranges: (0..60)
                .map(|i| UnencryptedRange { offset: i * 1000, size: 500 })
                .collect(),
        };
        let len = trailer.encoded_len();
        assert!(len > MAX_TRAILER_SIZE);

        let mut buf = vec![0u8; len];
        assert_eq!(trailer.encode_into(&mut buf), Err(ProtoError::TrailerTooLarge(len)));
    }

    #[test]
    fn parse_rejects_plain_frames() {
        assert_eq!(EncryptedFrame::parse(b"short"), Err(ProtoError::FrameTooShort { len: 5 }));
        assert_eq!(EncryptedFrame::parse(&[0u8; 32]), Err(ProtoError::MissingMarker));
        assert!(!is_encrypted(&[0u8; 32]));
    }

    #[test]
    fn parse_rejects_bad_supplemental_size() {
        let mut frame = vec![0u8; 30];
        frame[27] = 200;
        frame[28..].copy_from_slice(&MAGIC_MARKER);
        assert_eq!(
            EncryptedFrame::parse(&frame),
            Err(ProtoError::InvalidSupplementalSize { size: 200, len: 30 })
        );
    }
}
