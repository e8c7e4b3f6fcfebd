//! Adapter tests driven by the simulated session engine.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    rc::Rc,
    time::Duration,
};

use bytes::Bytes;
use dave_bridge::{
    DISABLED_VERSION, Decryptor, Encryptor, Host, MediaType, Outcome, RejectType, RosterMap,
    Session, UserId,
};
use dave_core::{FailureCallback, ProtocolVersionChangedCallback};
use dave_crypto::FingerprintParams;
use dave_harness::{CommitBundle, SimEnv, SimSession, add_proposals, messages::decode};

const GROUP: u64 = 1001;

type SimAdapter = Session<SimSession<SimEnv>>;

fn session(host: &Host, env: &SimEnv, user_id: UserId) -> SimAdapter {
    let mut session =
        Session::new(host, SimSession::new(env.clone(), FingerprintParams::light()), None);
    session.init(1, GROUP, user_id, None);
    session.set_external_sender(Bytes::from_static(b"gateway"));
    session
}

fn recognized(ids: &[UserId]) -> BTreeSet<UserId> {
    ids.iter().copied().collect()
}

/// Alice commits adding Bob; returns the bundle without applying it.
fn add_bob(alice: &mut SimAdapter, bob: &mut SimAdapter) -> CommitBundle {
    let proposals = add_proposals(GROUP, &[bob.get_marshalled_key_package().to_vec()]).unwrap();
    let bundle = alice.process_proposals(proposals, &recognized(&[1, 2])).unwrap();
    decode(&bundle).unwrap()
}

fn joined_pair(host: &Host, env: &SimEnv) -> (SimAdapter, SimAdapter) {
    let mut alice = session(host, env, 1);
    let mut bob = session(host, env, 2);
    let bundle = add_bob(&mut alice, &mut bob);

    assert!(alice.process_commit(&bundle.commit).is_payload());
    assert!(bob.process_commit(&bundle.commit).is_soft_ignore());
    assert!(bob.process_welcome(bundle.welcome.unwrap(), &recognized(&[1])).is_some());
    (alice, bob)
}

#[test]
fn protocol_version_is_disabled_before_init() {
    let host = Host::default();
    let session: SimAdapter = Session::new(
        &host,
        SimSession::new(SimEnv::with_seed(1), FingerprintParams::light()),
        None,
    );
    assert_eq!(session.get_protocol_version(), DISABLED_VERSION);
    assert!(session.get_last_epoch_authenticator().is_empty());
}

#[test]
fn garbage_commit_is_a_hard_failure() {
    let host = Host::default();
    let env = SimEnv::with_seed(2);
    let reasons = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reasons);
    let callback: FailureCallback = Box::new(move |source: &str, reason: &str| {
        sink.borrow_mut().push((source.to_owned(), reason.to_owned()));
    });

    let mut alice = Session::new(
        &host,
        SimSession::new(env.clone(), FingerprintParams::light()),
        Some(callback),
    );
    alice.init(1, GROUP, 1, None);

    let outcome = alice.process_commit(Bytes::from_static(b"\xffnot cbor"));
    assert_eq!(outcome, Outcome::HardFailure);
    assert_eq!(outcome.reject_type(), Some(RejectType::Failed));

    let reasons = reasons.borrow();
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].0, "processCommit");
}

#[test]
fn fresh_commit_yields_roster_and_replay_is_ignored() {
    let host = Host::default();
    let env = SimEnv::with_seed(3);
    let mut alice = session(&host, &env, 1);
    let mut bob = session(&host, &env, 2);
    let bundle = add_bob(&mut alice, &mut bob);

    let bob_key = bob.engine().signature_public_key().unwrap().to_vec();
    let expected: RosterMap = [(2, bob_key)].into_iter().collect();

    assert_eq!(alice.process_commit(&bundle.commit), Outcome::Payload(expected));
    assert_eq!(alice.process_commit(&bundle.commit), Outcome::SoftIgnore);
}

#[test]
fn members_agree_after_join() {
    let host = Host::default();
    let env = SimEnv::with_seed(4);
    let (alice, bob) = joined_pair(&host, &env);

    assert_eq!(alice.get_protocol_version(), 1);
    assert!(!alice.get_last_epoch_authenticator().is_empty());
    assert_eq!(alice.get_last_epoch_authenticator(), bob.get_last_epoch_authenticator());
}

#[test]
fn unknown_user_has_no_ratchet() {
    let host = Host::default();
    let env = SimEnv::with_seed(5);
    let (alice, _bob) = joined_pair(&host, &env);
    assert!(alice.get_key_ratchet(99).is_none());
}

#[test]
fn encrypt_then_decrypt_with_matching_ratchet() {
    let host = Host::default();
    let env = SimEnv::with_seed(6);
    let (alice, bob) = joined_pair(&host, &env);

    let mut encryptor = Encryptor::with_env(&host, env.clone());
    encryptor.set_key_ratchet(alice.get_key_ratchet(1));
    assert!(encryptor.has_key_ratchet());

    let mut decryptor = Decryptor::with_env(&host, env.clone());
    decryptor.transition_to_key_ratchet(bob.get_key_ratchet(1), None);

    let frame = Bytes::from_static(b"an opus frame of moderate length");
    for _ in 0..3 {
        let sealed = encryptor.encrypt(MediaType::Audio, 0xBEEF, &frame).unwrap();
        assert_ne!(sealed, frame);
        let bound = encryptor.get_max_ciphertext_byte_size(MediaType::Audio, frame.len());
        assert!(sealed.len() <= bound);

        let opened = decryptor.decrypt(MediaType::Audio, &sealed).unwrap();
        assert_eq!(opened, frame);
    }

    assert_eq!(encryptor.get_stats(MediaType::Audio).encrypt_success_count, 3);
    assert_eq!(decryptor.get_stats(MediaType::Audio).decrypt_success_count, 3);
    assert_eq!(decryptor.get_stats(MediaType::Video).decrypt_success_count, 0);
}

#[test]
fn mismatched_ratchet_yields_none() {
    let host = Host::default();
    let env = SimEnv::with_seed(7);
    let (alice, bob) = joined_pair(&host, &env);

    let mut encryptor = Encryptor::with_env(&host, env.clone());
    encryptor.set_key_ratchet(alice.get_key_ratchet(1));

    let mut decryptor = Decryptor::with_env(&host, env.clone());
    decryptor.transition_to_key_ratchet(bob.get_key_ratchet(2), None);

    let sealed = encryptor.encrypt(MediaType::Video, 7, b"keyframe").unwrap();
    assert!(decryptor.decrypt(MediaType::Video, &sealed).is_none());
    assert_eq!(decryptor.get_stats(MediaType::Video).decrypt_failure_count, 1);
}

#[test]
fn encrypt_without_ratchet_yields_none() {
    let host = Host::default();
    let mut encryptor = Encryptor::with_env(&host, SimEnv::with_seed(8));
    assert!(encryptor.encrypt(MediaType::Audio, 1, b"frame").is_none());
    assert_eq!(encryptor.get_stats(MediaType::Audio).encrypt_failure_count, 1);
}

#[test]
fn passthrough_closes_after_transition() {
    let host = Host::default();
    let env = SimEnv::with_seed(9);
    let mut decryptor = Decryptor::with_env(&host, env.clone());

    assert!(decryptor.decrypt(MediaType::Audio, b"plain").is_none());

    decryptor.transition_to_passthrough_mode(true, None);
    assert_eq!(decryptor.decrypt(MediaType::Audio, b"plain").unwrap(), &b"plain"[..]);

    decryptor.transition_to_passthrough_mode(false, Some(Duration::from_secs(2)));
    env.advance(Duration::from_secs(1));
    assert!(decryptor.decrypt(MediaType::Audio, b"plain").is_some());

    env.advance(Duration::from_secs(2));
    assert!(decryptor.decrypt(MediaType::Audio, b"plain").is_none());
    assert_eq!(decryptor.get_stats(MediaType::Audio).passthrough_count, 2);
}

#[test]
fn encryptor_passthrough_copies_frames() {
    let host = Host::default();
    let mut encryptor = Encryptor::with_env(&host, SimEnv::with_seed(10));
    encryptor.set_passthrough_mode(true);

    assert!(encryptor.is_passthrough_mode());
    assert_eq!(encryptor.get_protocol_version(), DISABLED_VERSION);
    assert_eq!(encryptor.encrypt(MediaType::Audio, 1, b"raw").unwrap(), &b"raw"[..]);
}

#[test]
fn version_callback_fires_on_change_only() {
    let host = Host::default();
    let mut encryptor = Encryptor::with_env(&host, SimEnv::with_seed(11));
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let callback: ProtocolVersionChangedCallback = Box::new(move || counter.set(counter.get() + 1));
    encryptor.set_protocol_version_changed_callback(Some(callback));
    assert_eq!(host.registered_callbacks(), 1);

    encryptor.set_passthrough_mode(true);
    encryptor.set_passthrough_mode(true);
    encryptor.set_passthrough_mode(false);
    assert_eq!(calls.get(), 2);

    encryptor.set_protocol_version_changed_callback(None);
    assert_eq!(host.registered_callbacks(), 0);
    encryptor.set_passthrough_mode(true);
    assert_eq!(calls.get(), 2);
}

#[test]
fn ssrc_codec_assignment() {
    let host = Host::default();
    let mut encryptor = Encryptor::with_env(&host, SimEnv::with_seed(12));
    encryptor.assign_ssrc_to_codec(42, dave_bridge::Codec::Vp8);

    assert_eq!(encryptor.codec_for_ssrc(42), dave_bridge::Codec::Vp8);
    assert_eq!(encryptor.codec_for_ssrc(43), dave_bridge::Codec::Opus);
}

#[test]
fn reset_drops_group_state() {
    let host = Host::default();
    let env = SimEnv::with_seed(13);
    let (mut alice, _bob) = joined_pair(&host, &env);

    alice.reset();
    assert!(alice.get_key_ratchet(1).is_none());
    assert!(alice.get_last_epoch_authenticator().is_empty());
}
