//! Session adapter.
//!
//! Wraps one [`SessionEngine`] for the host. Buffers cross with the
//! [`marshal`](crate::marshal) rules, commit results become [`Outcome`]s,
//! key ratchets leave as [`KeyRatchetHandle`]s and pairwise fingerprints
//! return as [`CompletionToken`]s resolved on the host thread.

use std::{
    cell::RefCell,
    collections::BTreeSet,
    fmt,
    rc::{Rc, Weak},
};

use bytes::Bytes;
use dave_core::{FailureCallback, SessionEngine, UserId};
use dave_crypto::SignatureKeyPair;
use dave_proto::{ProtocolVersion, RosterMap};

use crate::{
    Host, KeyRatchetHandle, Outcome,
    completion::{CompletionBridge, CompletionToken},
    marshal,
    registry::{self, CallbackId, CallbackRegistry, HostCallback, HostRefs, Traverse},
};

/// Host-facing session.
pub struct Session<S: SessionEngine> {
    engine: S,
    completions: CompletionBridge<Bytes>,
    registry: Weak<RefCell<CallbackRegistry>>,
    failure_callback: Option<CallbackId>,
}

impl<S: SessionEngine> Session<S> {
    /// Wraps `engine`, registering `failure_callback` with the host.
    pub fn new(host: &Host, mut engine: S, failure_callback: Option<FailureCallback>) -> Self {
        let registry = Rc::downgrade(host.registry());

        let failure_callback = failure_callback.map(|callback| {
            let id = host.register(HostCallback::Failure(callback));
            let thunk_registry = registry.clone();
            engine.set_failure_callback(Box::new(move |source: &str, reason: &str| {
                registry::invoke_failure(&thunk_registry, id, source, reason);
            }));
            id
        });

        Self { engine, completions: host.completions(), registry, failure_callback }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &S {
        &self.engine
    }

    /// Starts the session for `group_id`.
    pub fn init(
        &mut self,
        version: ProtocolVersion,
        group_id: u64,
        self_user_id: UserId,
        transient_key: Option<SignatureKeyPair>,
    ) {
        tracing::debug!(version, group_id, self_user_id, "session init");
        self.engine.init(version, group_id, self_user_id, transient_key);
    }

    /// Drops all group state.
    pub fn reset(&mut self) {
        tracing::debug!("session reset");
        self.engine.reset();
    }

    /// Changes the protocol version.
    pub fn set_protocol_version(&mut self, version: ProtocolVersion) {
        self.engine.set_protocol_version(version);
    }

    /// Current protocol version; disabled before [`Self::init`].
    pub fn get_protocol_version(&self) -> ProtocolVersion {
        self.engine.protocol_version()
    }

    /// Authenticator of the most recent epoch.
    pub fn get_last_epoch_authenticator(&self) -> Bytes {
        marshal::to_host(self.engine.last_epoch_authenticator())
    }

    /// Installs the external sender.
    pub fn set_external_sender(&mut self, external_sender: impl AsRef<[u8]>) {
        let external_sender = marshal::to_native(external_sender);
        self.engine.set_external_sender(&external_sender);
    }

    /// Applies proposals; returns the commit to send, if any.
    pub fn process_proposals(
        &mut self,
        proposals: impl AsRef<[u8]>,
        recognized_user_ids: &BTreeSet<UserId>,
    ) -> Option<Bytes> {
        let proposals = marshal::to_native(proposals);
        self.engine.process_proposals(&proposals, recognized_user_ids).map(marshal::to_host)
    }

    /// Applies a commit.
    pub fn process_commit(&mut self, commit: impl AsRef<[u8]>) -> Outcome<RosterMap> {
        let commit = marshal::to_native(commit);
        let outcome = Outcome::map_native(self.engine.process_commit(&commit));
        tracing::debug!(reject = ?outcome.reject_type(), "commit processed");
        outcome
    }

    /// Joins a group from a welcome.
    pub fn process_welcome(
        &mut self,
        welcome: impl AsRef<[u8]>,
        recognized_user_ids: &BTreeSet<UserId>,
    ) -> Option<RosterMap> {
        let welcome = marshal::to_native(welcome);
        self.engine.process_welcome(&welcome, recognized_user_ids)
    }

    /// Serialized key package for this member.
    pub fn get_marshalled_key_package(&mut self) -> Bytes {
        marshal::to_host(self.engine.marshalled_key_package())
    }

    /// Key ratchet for `user_id` in the current epoch.
    pub fn get_key_ratchet(&self, user_id: UserId) -> Option<KeyRatchetHandle> {
        self.engine.key_ratchet(user_id).map(KeyRatchetHandle::new)
    }

    /// Starts a pairwise fingerprint derivation with `user_id`.
    ///
    /// The token resolves once the host dispatches the result. Empty bytes
    /// mean the fingerprint could not be computed.
    pub fn get_pairwise_fingerprint(
        &self,
        version: ProtocolVersion,
        user_id: UserId,
    ) -> CompletionToken<Bytes> {
        let (token, completer) = self.completions.begin();
        tracing::debug!(user_id, token = token.id(), "pairwise fingerprint requested");
        self.engine.pairwise_fingerprint(
            version,
            user_id,
            Box::new(move |fingerprint| completer.complete(marshal::to_host(fingerprint))),
        );
        token
    }
}

impl<S: SessionEngine> Traverse for Session<S> {
    fn collect_references(&self) -> HostRefs {
        HostRefs::new("Session", self.failure_callback)
    }
}

impl<S: SessionEngine> Drop for Session<S> {
    fn drop(&mut self) {
        if let Some(id) = self.failure_callback.take() {
            registry::release(&self.registry, id);
        }
    }
}

impl<S: SessionEngine> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("protocol_version", &self.engine.protocol_version())
            .field("failure_callback", &self.failure_callback)
            .finish_non_exhaustive()
    }
}
