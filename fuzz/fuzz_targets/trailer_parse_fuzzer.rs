//! Fuzz target for the encrypted frame trailer parser
//!
//! Frames arrive from the network untrusted; the parser is the first code
//! that touches them.
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary frames, most without a marker
//! - Forged trailers: a fuzzed body followed by a fuzzed trailer with a
//!   valid marker, so the size byte and nonce region get exercised
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - A parsed frame re-encodes to exactly the bytes it was parsed from
//! - A parsed frame is always recognized as encrypted
//! - Parsed ranges split and rejoin to exactly the body

#![no_main]

use arbitrary::Arbitrary;
use dave_proto::{
    is_encrypted, join_ranges, split_ranges, EncryptedFrame, MAGIC_MARKER, MAX_TRAILER_SIZE,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum FuzzInput {
    Raw(Vec<u8>),
    Forged { body: Vec<u8>, trailer: Vec<u8>, size: u8 },
}

fuzz_target!(|input: FuzzInput| {
    let frame = match input {
        FuzzInput::Raw(bytes) => bytes,
        FuzzInput::Forged { mut body, trailer, size } => {
            body.extend_from_slice(&trailer);
            body.push(size);
            body.extend_from_slice(&MAGIC_MARKER);
            body
        },
    };

    let Ok(parsed) = EncryptedFrame::parse(&frame) else {
        return;
    };

    assert!(is_encrypted(&frame));
    assert!(frame.starts_with(parsed.body));

    let mut encoded = [0u8; MAX_TRAILER_SIZE];
    let len = parsed.trailer.encode_into(&mut encoded).expect("trailer fits its maximum size");
    assert_eq!(
        &frame[parsed.body.len()..],
        &encoded[..len],
        "trailer must re-encode to its input bytes"
    );

    let ranges = &parsed.trailer.unencrypted_ranges;
    let (clear, protected) = split_ranges(parsed.body, ranges);
    let mut rejoined = vec![0u8; parsed.body.len()];
    assert_eq!(join_ranges(ranges, &clear, &protected, &mut rejoined), parsed.body.len());
    assert_eq!(rejoined.as_slice(), parsed.body);
});
