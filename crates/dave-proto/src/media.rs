//! Media kinds and codecs.

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::ProtoError;

/// Kind of media carried by a frame.
///
/// Encryptors and decryptors keep separate statistics per media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MediaType {
    /// Audio frames.
    Audio = 0,
    /// Video frames.
    Video = 1,
}

impl MediaType {
    /// Every media type, in discriminant order.
    pub const ALL: [Self; 2] = [Self::Audio, Self::Video];

    /// Dense index, usable for per-media arrays.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for MediaType {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Audio),
            1 => Ok(Self::Video),
            other => Err(ProtoError::UnknownMediaType(other)),
        }
    }
}

/// Codec assigned to an RTP stream.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
)]
#[repr(u8)]
pub enum Codec {
    /// Codec not known.
    #[default]
    Unknown = 0,
    /// Opus audio.
    Opus = 1,
    /// VP8 video.
    Vp8 = 2,
    /// VP9 video.
    Vp9 = 3,
    /// H.264 video.
    H264 = 4,
    /// H.265 video.
    H265 = 5,
    /// AV1 video.
    Av1 = 6,
}

impl TryFrom<u8> for Codec {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Opus),
            2 => Ok(Self::Vp8),
            3 => Ok(Self::Vp9),
            4 => Ok(Self::H264),
            5 => Ok(Self::H265),
            6 => Ok(Self::Av1),
            other => Err(ProtoError::UnknownCodec(other)),
        }
    }
}
