//! Simulated group session engine.
//!
//! `SimSession` implements [`SessionEngine`] with the observable behavior of
//! the real engine (epochs, rosters, per-sender key ratchets, tri-state
//! commit results, off-thread fingerprints) but none of its security. It
//! lets the bridge and the frame engines run end to end in tests.
//!
//! # Epoch schedule
//!
//! ```text
//! epoch_secret[0]   = random (pending group, creator only)
//! epoch_secret[n+1] = HKDF(epoch_secret[n], "dave sim epoch" || commit_secret)
//! sender_base[u]    = derive_sender_base_secret(epoch_secret[n], u)
//! ```
//!
//! # Commit classification
//!
//! - Undecodable, wrong group, no group, future epoch: `Failed`
//! - Older epoch, a commit adding this member, or another member's commit
//!   while this member only holds a pending group: `Ignored`
//! - Otherwise: `Applied` with the roster changes

use std::{collections::BTreeSet, fmt};

use dave_core::{
    CommitResult, Environment, FailureCallback, FingerprintCallback, SessionEngine, UserId,
};
use dave_crypto::{
    FingerprintParams, HashRatchet, KeyRatchet, SignatureKeyPair, derive_sender_base_secret,
    pairwise_fingerprint,
};
use dave_proto::{DISABLED_VERSION, ProtocolVersion, RosterMap};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::messages::{
    Commit, CommitBundle, KeyPackage, ProposalBatch, Welcome, decode, encode,
};

const SECRET_SIZE: usize = 32;
const EPOCH_LABEL: &[u8] = b"dave sim epoch";
const AUTHENTICATOR_LABEL: &[u8] = b"dave sim authenticator";

struct GroupState {
    epoch: u64,
    epoch_secret: Zeroizing<[u8; SECRET_SIZE]>,
    roster: RosterMap,
    // Created locally and not yet confirmed by a commit or welcome.
    pending: bool,
}

impl GroupState {
    fn next_secret(&self, commit_secret: &[u8]) -> Zeroizing<[u8; SECRET_SIZE]> {
        let hk = Hkdf::<Sha256>::new(Some(commit_secret), self.epoch_secret.as_slice());
        let mut next = Zeroizing::new([0u8; SECRET_SIZE]);
        // 32 bytes is always a valid HKDF-SHA256 output length.
        if hk.expand(EPOCH_LABEL, next.as_mut_slice()).is_err() {
            tracing::error!("epoch secret expansion failed");
        }
        next
    }
}

/// Deterministic stand-in for the group key agreement engine.
pub struct SimSession<E: Environment> {
    env: E,
    fingerprint_params: FingerprintParams,
    version: ProtocolVersion,
    group_id: u64,
    self_user_id: Option<UserId>,
    signature_key: Option<SignatureKeyPair>,
    external_sender: Option<Vec<u8>>,
    group: Option<GroupState>,
    failure_callback: Option<FailureCallback>,
}

impl<E: Environment> SimSession<E> {
    /// Creates an uninitialized session.
    pub fn new(env: E, fingerprint_params: FingerprintParams) -> Self {
        Self {
            env,
            fingerprint_params,
            version: DISABLED_VERSION,
            group_id: 0,
            self_user_id: None,
            signature_key: None,
            external_sender: None,
            group: None,
            failure_callback: None,
        }
    }

    /// Current epoch, if in a group.
    pub fn epoch(&self) -> Option<u64> {
        self.group.as_ref().map(|group| group.epoch)
    }

    /// Current roster, empty without a group.
    pub fn roster(&self) -> RosterMap {
        self.group.as_ref().map(|group| group.roster.clone()).unwrap_or_default()
    }

    /// Signature public key, once initialized.
    pub fn signature_public_key(&self) -> Option<[u8; 32]> {
        self.signature_key.as_ref().map(SignatureKeyPair::public_key)
    }

    fn fail(&mut self, source: &str, reason: &str) {
        tracing::warn!(source, reason, "simulated session rejected message");
        if let Some(callback) = self.failure_callback.as_mut() {
            callback(source, reason);
        }
    }

    fn random_secret(&self) -> Zeroizing<[u8; SECRET_SIZE]> {
        let mut secret = Zeroizing::new([0u8; SECRET_SIZE]);
        self.env.random_bytes(secret.as_mut_slice());
        secret
    }

    fn build_commit(
        &self,
        batch: ProposalBatch,
        recognized_user_ids: &BTreeSet<UserId>,
    ) -> Result<Vec<u8>, String> {
        let self_user_id = self.self_user_id.ok_or("session not initialized")?;
        let group = self.group.as_ref().ok_or("no group")?;

        let mut add = Vec::with_capacity(batch.add.len());
        for bytes in &batch.add {
            let package: KeyPackage = decode(bytes).map_err(|e| e.to_string())?;
            if !recognized_user_ids.contains(&package.user_id) {
                return Err(format!("unrecognized user {}", package.user_id));
            }
            add.push(package);
        }

        let commit_secret = self.random_secret();
        let commit = Commit {
            group_id: self.group_id,
            epoch: group.epoch,
            committer: self_user_id,
            add,
            remove: batch.remove,
            commit_secret: commit_secret.to_vec(),
        };

        let welcome = if commit.add.is_empty() {
            None
        } else {
            let mut roster = group.roster.clone();
            apply_roster_changes(&mut roster, &commit);
            let welcome = Welcome {
                group_id: self.group_id,
                epoch: group.epoch + 1,
                epoch_secret: group.next_secret(&commit.commit_secret).to_vec(),
                roster,
            };
            Some(encode(&welcome).map_err(|e| e.to_string())?)
        };

        let bundle = CommitBundle { commit: encode(&commit).map_err(|e| e.to_string())?, welcome };
        encode(&bundle).map_err(|e| e.to_string())
    }

    /// Whether `commit` applies to this member; `Err` for invalid commits.
    fn commit_applies(&self, commit: &Commit) -> Result<bool, String> {
        let group = self.group.as_ref().ok_or("no group")?;
        let self_user_id = self.self_user_id.ok_or("session not initialized")?;

        if commit.group_id != self.group_id {
            return Err(format!("commit for group {} in group {}", commit.group_id, self.group_id));
        }
        if commit.epoch > group.epoch {
            return Err(format!("commit for future epoch {} at {}", commit.epoch, group.epoch));
        }
        if commit.epoch < group.epoch
            || commit.add.iter().any(|package| package.user_id == self_user_id)
            || (group.pending && commit.committer != self_user_id)
        {
            return Ok(false);
        }
        Ok(true)
    }
}

fn apply_roster_changes(roster: &mut RosterMap, commit: &Commit) -> RosterMap {
    let mut changes = RosterMap::new();
    for user_id in &commit.remove {
        if roster.remove(user_id).is_some() {
            changes.insert(*user_id, Vec::new());
        }
    }
    for package in &commit.add {
        roster.insert(package.user_id, package.signature_key.clone());
        changes.insert(package.user_id, package.signature_key.clone());
    }
    changes
}

impl<E: Environment> SessionEngine for SimSession<E> {
    fn init(
        &mut self,
        version: ProtocolVersion,
        group_id: u64,
        self_user_id: UserId,
        transient_key: Option<SignatureKeyPair>,
    ) {
        let signature_key = transient_key.unwrap_or_else(|| {
            let secret = self.random_secret();
            SignatureKeyPair::from_secret_bytes(&secret)
        });

        let mut roster = RosterMap::new();
        roster.insert(self_user_id, signature_key.public_key().to_vec());

        self.version = version;
        self.group_id = group_id;
        self.self_user_id = Some(self_user_id);
        self.group = Some(GroupState {
            epoch: 0,
            epoch_secret: self.random_secret(),
            roster,
            pending: true,
        });
        self.signature_key = Some(signature_key);
        tracing::debug!(version, group_id, self_user_id, "simulated session initialized");
    }

    fn reset(&mut self) {
        self.group = None;
        self.external_sender = None;
    }

    fn set_protocol_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    fn last_epoch_authenticator(&self) -> Vec<u8> {
        let Some(group) = self.group.as_ref().filter(|group| !group.pending) else {
            return Vec::new();
        };

        let hk = Hkdf::<Sha256>::new(None, group.epoch_secret.as_slice());
        let mut out = vec![0u8; SECRET_SIZE];
        if hk.expand(AUTHENTICATOR_LABEL, &mut out).is_err() {
            return Vec::new();
        }
        out
    }

    fn set_external_sender(&mut self, external_sender: &[u8]) {
        self.external_sender = Some(external_sender.to_vec());
    }

    fn process_proposals(
        &mut self,
        proposals: &[u8],
        recognized_user_ids: &BTreeSet<UserId>,
    ) -> Option<Vec<u8>> {
        if self.external_sender.is_none() {
            self.fail("processProposals", "no external sender");
            return None;
        }

        let batch = match decode::<ProposalBatch>(proposals) {
            Ok(batch) if batch.group_id == self.group_id => batch,
            Ok(batch) => {
                self.fail("processProposals", &format!("wrong group {}", batch.group_id));
                return None;
            },
            Err(e) => {
                self.fail("processProposals", &e.to_string());
                return None;
            },
        };

        match self.build_commit(batch, recognized_user_ids) {
            Ok(bundle) => Some(bundle),
            Err(reason) => {
                self.fail("processProposals", &reason);
                None
            },
        }
    }

    fn process_commit(&mut self, commit: &[u8]) -> CommitResult<RosterMap> {
        let commit = match decode::<Commit>(commit) {
            Ok(commit) => commit,
            Err(e) => {
                self.fail("processCommit", &e.to_string());
                return CommitResult::Failed;
            },
        };

        match self.commit_applies(&commit) {
            Err(reason) => {
                self.fail("processCommit", &reason);
                return CommitResult::Failed;
            },
            Ok(false) => {
                tracing::debug!(epoch = commit.epoch, "ignoring inapplicable commit");
                return CommitResult::Ignored;
            },
            Ok(true) => {},
        }

        let self_user_id = self.self_user_id;
        let Some(group) = self.group.as_mut() else {
            return CommitResult::Failed;
        };

        let changes = apply_roster_changes(&mut group.roster, &commit);
        group.epoch_secret = group.next_secret(&commit.commit_secret);
        group.epoch += 1;
        group.pending = false;

        if self_user_id.is_some_and(|id| !group.roster.contains_key(&id)) {
            tracing::debug!("removed from group");
            self.group = None;
        }

        CommitResult::Applied(changes)
    }

    fn process_welcome(
        &mut self,
        welcome: &[u8],
        recognized_user_ids: &BTreeSet<UserId>,
    ) -> Option<RosterMap> {
        let welcome = match decode::<Welcome>(welcome) {
            Ok(welcome) => welcome,
            Err(e) => {
                self.fail("processWelcome", &e.to_string());
                return None;
            },
        };

        let reason = if welcome.group_id != self.group_id {
            Some(format!("welcome for group {}", welcome.group_id))
        } else if !self.self_user_id.is_some_and(|id| welcome.roster.contains_key(&id)) {
            Some("welcome does not include this member".to_owned())
        } else if let Some(unknown) = welcome
            .roster
            .keys()
            .find(|id| Some(**id) != self.self_user_id && !recognized_user_ids.contains(id))
        {
            Some(format!("unrecognized user {unknown}"))
        } else {
            None
        };

        if let Some(reason) = reason {
            self.fail("processWelcome", &reason);
            return None;
        }

        let Ok(secret) = <[u8; SECRET_SIZE]>::try_from(welcome.epoch_secret.as_slice()) else {
            self.fail("processWelcome", "bad epoch secret");
            return None;
        };

        self.group = Some(GroupState {
            epoch: welcome.epoch,
            epoch_secret: Zeroizing::new(secret),
            roster: welcome.roster.clone(),
            pending: false,
        });
        Some(welcome.roster)
    }

    fn marshalled_key_package(&mut self) -> Vec<u8> {
        let (Some(user_id), Some(key)) = (self.self_user_id, self.signature_key.as_ref()) else {
            return Vec::new();
        };

        let package = KeyPackage { user_id, signature_key: key.public_key().to_vec() };
        encode(&package).unwrap_or_else(|e| {
            tracing::error!(error = %e, "key package encoding failed");
            Vec::new()
        })
    }

    fn key_ratchet(&self, user_id: UserId) -> Option<Box<dyn KeyRatchet>> {
        let group = self.group.as_ref()?;
        if group.roster.get(&user_id).is_none_or(Vec::is_empty) {
            return None;
        }

        let base =
            Zeroizing::new(derive_sender_base_secret(group.epoch_secret.as_slice(), user_id).ok()?);
        Some(Box::new(HashRatchet::new(base.as_slice())))
    }

    fn pairwise_fingerprint(
        &self,
        version: ProtocolVersion,
        user_id: UserId,
        callback: FingerprintCallback,
    ) {
        let local = self.self_user_id.zip(self.signature_public_key());
        let remote = self.group.as_ref().and_then(|group| group.roster.get(&user_id)).cloned();

        let (Some((local_id, local_key)), Some(remote_key)) = (local, remote) else {
            tracing::debug!(user_id, "no fingerprint input for user");
            callback(Vec::new());
            return;
        };

        let params = self.fingerprint_params;
        std::thread::spawn(move || {
            let fingerprint = pairwise_fingerprint(
                &params,
                version,
                (local_id, &local_key),
                (user_id, &remote_key),
            )
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "fingerprint derivation failed");
                Vec::new()
            });
            callback(fingerprint);
        });
    }

    fn set_failure_callback(&mut self, callback: FailureCallback) {
        self.failure_callback = Some(callback);
    }
}

impl<E: Environment> fmt::Debug for SimSession<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimSession")
            .field("version", &self.version)
            .field("group_id", &self.group_id)
            .field("self_user_id", &self.self_user_id)
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}
