//! Wire decoding errors.

use thiserror::Error;

/// Errors from parsing or writing wire-level values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Frame is shorter than the smallest possible trailer.
    #[error("frame too short: {len} bytes")]
    FrameTooShort {
        /// Length of the rejected frame.
        len: usize,
    },

    /// Frame does not end with the magic marker.
    #[error("missing magic marker")]
    MissingMarker,

    /// Supplemental size byte is inconsistent with the frame.
    #[error("invalid supplemental size {size} for frame of {len} bytes")]
    InvalidSupplementalSize {
        /// Declared supplemental size.
        size: usize,
        /// Total frame length.
        len: usize,
    },

    /// ULEB128 value is truncated or does not fit in 32 bits.
    #[error("malformed ULEB128 value")]
    MalformedUleb128,

    /// Unencrypted ranges overlap, are empty, or run past the frame body.
    #[error("invalid unencrypted ranges")]
    InvalidRanges,

    /// Encoded trailer would not fit the supplemental size byte.
    #[error("trailer of {0} bytes exceeds the maximum")]
    TrailerTooLarge(usize),

    /// Output buffer cannot hold the encoded value.
    #[error("output buffer too small: need {needed}, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Numeric codec value has no matching variant.
    #[error("unknown codec: {0}")]
    UnknownCodec(u8),

    /// Numeric media type value has no matching variant.
    #[error("unknown media type: {0}")]
    UnknownMediaType(u8),
}
