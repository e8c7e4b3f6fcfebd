//! Session engine interface.
//!
//! A session engine runs the group key agreement: it consumes proposals,
//! commits and welcomes from the voice gateway, exports a key package and
//! hands out one key ratchet per participant for the current epoch.
//!
//! The engine is an external collaborator. Everything above it (the bridge
//! adapters) talks to it through [`SessionEngine`] only, so a production
//! MLS engine and the deterministic simulation engine are interchangeable.
//!
//! # Invariants
//!
//! - Rejections are values: malformed input yields [`CommitResult::Failed`]
//!   or `None`, never a panic
//! - A rejected message leaves the session state unchanged
//! - The fingerprint callback is invoked exactly once per request, possibly
//!   on another thread

use std::collections::BTreeSet;

use dave_crypto::{KeyRatchet, SignatureKeyPair};
use dave_proto::{ProtocolVersion, RosterMap};

/// Participant identifier.
pub type UserId = u64;

/// Receives the result of a pairwise fingerprint computation.
///
/// Called exactly once, from whichever thread finished the derivation. An
/// empty vector means the fingerprint could not be computed.
pub type FingerprintCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Receives `(source, reason)` when the engine rejects a message.
pub type FailureCallback = Box<dyn FnMut(&str, &str)>;

/// Tri-state result of commit processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult<T> {
    /// Message is invalid; session state is unaffected.
    Failed,
    /// Message is valid but does not apply (stale epoch, own echo).
    Ignored,
    /// Message was applied.
    Applied(T),
}

/// Group key agreement engine driven by the session adapter.
pub trait SessionEngine {
    /// Starts a session for `group_id` at `version`.
    ///
    /// Without a transient key the engine generates one.
    fn init(
        &mut self,
        version: ProtocolVersion,
        group_id: u64,
        self_user_id: UserId,
        transient_key: Option<SignatureKeyPair>,
    );

    /// Drops all group state. The session must be initialized again.
    fn reset(&mut self);

    /// Changes the protocol version for subsequent group operations.
    fn set_protocol_version(&mut self, version: ProtocolVersion);

    /// Current protocol version; disabled before `init`.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Authenticator of the most recent epoch, empty without a group.
    fn last_epoch_authenticator(&self) -> Vec<u8>;

    /// Installs the external sender allowed to propose changes.
    fn set_external_sender(&mut self, external_sender: &[u8]);

    /// Applies proposals and returns a commit to send, if any.
    fn process_proposals(
        &mut self,
        proposals: &[u8],
        recognized_user_ids: &BTreeSet<UserId>,
    ) -> Option<Vec<u8>>;

    /// Applies a commit.
    fn process_commit(&mut self, commit: &[u8]) -> CommitResult<RosterMap>;

    /// Joins a group from a welcome message.
    fn process_welcome(
        &mut self,
        welcome: &[u8],
        recognized_user_ids: &BTreeSet<UserId>,
    ) -> Option<RosterMap>;

    /// Serialized key package for this member.
    fn marshalled_key_package(&mut self) -> Vec<u8>;

    /// Key ratchet for `user_id` in the current epoch.
    fn key_ratchet(&self, user_id: UserId) -> Option<Box<dyn KeyRatchet>>;

    /// Starts a pairwise fingerprint derivation with `user_id`.
    ///
    /// The derivation is expensive; implementations run it off the calling
    /// thread and invoke `callback` when done.
    fn pairwise_fingerprint(
        &self,
        version: ProtocolVersion,
        user_id: UserId,
        callback: FingerprintCallback,
    );

    /// Installs the callback invoked when a message is rejected.
    fn set_failure_callback(&mut self, callback: FailureCallback);
}
