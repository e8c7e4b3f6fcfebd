//! Simulated group messages.
//!
//! Stand-ins for the MLS handshake messages the voice gateway relays. They
//! carry just enough to drive roster and epoch changes and are encoded as
//! CBOR. Nothing here is confidential: welcomes carry the epoch secret in
//! the clear.

use dave_core::UserId;
use dave_proto::RosterMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Message encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Bytes are not a valid message of the expected kind.
    #[error("decode failed: {0}")]
    Decode(String),
    /// Value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Member's advertised identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackage {
    /// Member id.
    pub user_id: UserId,
    /// Member's signature public key.
    pub signature_key: Vec<u8>,
}

/// Membership changes proposed by the external sender.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProposalBatch {
    /// Group the proposals apply to.
    pub group_id: u64,
    /// Serialized key packages of members to add.
    pub add: Vec<Vec<u8>>,
    /// Members to remove.
    pub remove: Vec<UserId>,
}

/// Epoch change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Group the commit applies to.
    pub group_id: u64,
    /// Epoch the commit moves away from.
    pub epoch: u64,
    /// Member that produced the commit.
    pub committer: UserId,
    /// Members added.
    pub add: Vec<KeyPackage>,
    /// Members removed.
    pub remove: Vec<UserId>,
    /// Fresh entropy mixed into the next epoch secret.
    pub commit_secret: Vec<u8>,
}

/// Invitation into a group at a given epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// Group being joined.
    pub group_id: u64,
    /// Epoch the new member starts at.
    pub epoch: u64,
    /// Epoch secret of that epoch.
    pub epoch_secret: Vec<u8>,
    /// Full roster of that epoch.
    pub roster: RosterMap,
}

/// Output of proposal processing: a commit plus a welcome when members
/// were added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBundle {
    /// Serialized [`Commit`].
    pub commit: Vec<u8>,
    /// Serialized [`Welcome`], if anyone was added.
    pub welcome: Option<Vec<u8>>,
}

/// Serializes a message as CBOR.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, MessageError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(message, &mut bytes)
        .map_err(|e| MessageError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Parses a CBOR message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MessageError> {
    ciborium::de::from_reader(bytes).map_err(|e| MessageError::Decode(e.to_string()))
}

/// Builds a proposal batch adding the members behind `key_packages`.
pub fn add_proposals(group_id: u64, key_packages: &[Vec<u8>]) -> Result<Vec<u8>, MessageError> {
    encode(&ProposalBatch { group_id, add: key_packages.to_vec(), remove: Vec::new() })
}

/// Builds a proposal batch removing `user_ids`.
pub fn remove_proposals(group_id: u64, user_ids: &[UserId]) -> Result<Vec<u8>, MessageError> {
    encode(&ProposalBatch { group_id, add: Vec::new(), remove: user_ids.to_vec() })
}
