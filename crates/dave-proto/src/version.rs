//! Protocol version sentinels and the roster map.

use std::collections::BTreeMap;

/// Protocol version negotiated for a session.
pub type ProtocolVersion = u16;

/// Version reported while end-to-end encryption is disabled.
pub const DISABLED_VERSION: ProtocolVersion = 0;

/// Transition id used for the initial transition into a session.
pub const INIT_TRANSITION_ID: u16 = 0;

const MAX_SUPPORTED_PROTOCOL_VERSION: ProtocolVersion = 1;

/// Highest protocol version this implementation can speak.
pub const fn max_supported_protocol_version() -> ProtocolVersion {
    MAX_SUPPORTED_PROTOCOL_VERSION
}

/// Participant id to participant signature key.
///
/// Produced by commit and welcome processing. An empty value marks a
/// participant that was removed by the commit.
pub type RosterMap = BTreeMap<u64, Vec<u8>>;
