//! Dave Protocol Wire Types
//!
//! Value types shared by every layer of the workspace: media kinds, codecs,
//! protocol version sentinels, the roster map, and the trailer that marks a
//! media frame as end-to-end encrypted.
//!
//! # Encrypted Frame Layout
//!
//! ```text
//! ┌──────┬──────────┬─────────────────┬──────────────────────┬─────────────┬───────────┐
//! │ body │ tag (16) │ nonce (ULEB128) │ ranges (ULEB128 x 2) │ supp. size  │ 0xFA 0xFA │
//! └──────┴──────────┴─────────────────┴──────────────────────┴─────────────┴───────────┘
//! ```
//!
//! The body is the frame with its unencrypted ranges left in place and every
//! other byte encrypted. Each range is an `(offset, size)` pair into the
//! body. The supplemental size byte counts everything after the body,
//! including itself and the magic marker. A frame that does not end in the
//! magic marker is treated as unencrypted.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod frame;
pub mod media;
pub mod version;

pub use error::ProtoError;
pub use frame::{
    EncryptedFrame, FrameTrailer, GENERATION_SHIFT_BITS, KeyGeneration, MAGIC_MARKER,
    MAX_TRAILER_SIZE, TAG_SIZE, TruncatedNonce, UnencryptedRange, generation_of, is_encrypted,
    join_ranges, split_ranges, validate_ranges,
};
pub use media::{Codec, MediaType};
pub use version::{
    DISABLED_VERSION, INIT_TRANSITION_ID, ProtocolVersion, RosterMap, max_supported_protocol_version,
};
