//! Codec-aware frame layout.
//!
//! Packetizers need to read parts of some video frames: the VP8 payload
//! header, and the start codes and NAL unit headers of H.264 and H.265
//! Annex B streams. Those bytes stay in the clear and are authenticated as
//! additional data. Everything else is encrypted.
//!
//! # Invariants
//!
//! - Returned ranges pass [`dave_proto::validate_ranges`] for the frame
//! - Adjacent ranges are merged
//! - Audio and unparsed codecs are encrypted in full

use dave_proto::{Codec, UnencryptedRange};

/// Sealing attempts per frame before an H.26x frame is given up on.
pub const MAX_CIPHERTEXT_VALIDATION_ATTEMPTS: u64 = 10;

const VP8_KEY_FRAME_HEADER: usize = 10;
const VP8_DELTA_FRAME_HEADER: usize = 1;

const START_CODE: [u8; 3] = [0, 0, 1];

#[derive(Debug, Clone, Copy)]
enum NalFormat {
    H264,
    H265,
}

impl NalFormat {
    const fn header_len(self) -> usize {
        match self {
            Self::H264 => 1,
            Self::H265 => 2,
        }
    }

    /// Slice units keep only their header in the clear.
    const fn is_slice(self, first_header_byte: u8) -> bool {
        match self {
            Self::H264 => matches!(first_header_byte & 0x1F, 1..=5),
            Self::H265 => ((first_header_byte >> 1) & 0x3F) <= 31,
        }
    }
}

/// Body ranges of `frame` that stay unencrypted under `codec`.
pub fn unencrypted_ranges(codec: Codec, frame: &[u8]) -> Vec<UnencryptedRange> {
    match codec {
        Codec::Vp8 => vp8_ranges(frame),
        Codec::H264 => annex_b_ranges(frame, NalFormat::H264),
        Codec::H265 => annex_b_ranges(frame, NalFormat::H265),
        Codec::Unknown | Codec::Opus | Codec::Vp9 | Codec::Av1 => Vec::new(),
    }
}

/// Whether a sealed frame keeps the start codes of its plaintext and no more.
///
/// A start code formed by ciphertext or trailer bytes would make a
/// depacketizer split the frame in the wrong place.
pub fn sealed_frame_is_valid(codec: Codec, plaintext: &[u8], sealed: &[u8]) -> bool {
    match codec {
        Codec::H264 | Codec::H265 => start_codes(sealed).eq(start_codes(plaintext)),
        _ => true,
    }
}

fn vp8_ranges(frame: &[u8]) -> Vec<UnencryptedRange> {
    let Some(&first) = frame.first() else {
        return Vec::new();
    };

    // Bit 0 of the first byte is clear on key frames.
    let header = if first & 0x01 == 0 { VP8_KEY_FRAME_HEADER } else { VP8_DELTA_FRAME_HEADER };
    vec![UnencryptedRange { offset: 0, size: header.min(frame.len()) }]
}

fn start_codes(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    bytes
        .windows(START_CODE.len())
        .enumerate()
        .filter(|(_, window)| *window == START_CODE)
        .map(|(at, _)| at)
}

fn annex_b_ranges(frame: &[u8], format: NalFormat) -> Vec<UnencryptedRange> {
    // (first byte of the start code including a leading zero, start code offset)
    let units: Vec<(usize, usize)> = start_codes(frame)
        .map(|at| {
            let begin = if at > 0 && frame[at - 1] == 0 { at - 1 } else { at };
            (begin, at)
        })
        .collect();

    let mut ranges: Vec<UnencryptedRange> = Vec::new();
    for (i, &(begin, at)) in units.iter().enumerate() {
        let unit_end = units.get(i + 1).map_or(frame.len(), |&(next, _)| next);
        let header_at = at + START_CODE.len();

        let clear_end = match frame.get(header_at) {
            Some(&header) if format.is_slice(header) => {
                (header_at + format.header_len()).min(unit_end)
            },
            _ => unit_end,
        };
        push_merged(&mut ranges, begin, clear_end);
    }
    ranges
}

fn push_merged(ranges: &mut Vec<UnencryptedRange>, begin: usize, end: usize) {
    match ranges.last_mut() {
        Some(last) if last.end() == begin => last.size += end - begin,
        _ => ranges.push(UnencryptedRange { offset: begin, size: end - begin }),
    }
}
