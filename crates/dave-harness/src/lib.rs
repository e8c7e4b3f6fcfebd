//! Deterministic simulation harness for Dave session testing.
//!
//! A seeded [`SimEnv`] and a model group engine, [`SimSession`], that
//! implements `SessionEngine` without real MLS. Together they let the frame
//! engines and the bridge adapters run complete join, commit and
//! key-rotation flows in ordinary unit tests.
//!
//! # Reproducibility
//!
//! Every random value (signature keys, epoch secrets, commit entropy) is
//! drawn from the `SimEnv` RNG, so a seed fully determines a run. Time only
//! advances through [`SimEnv::advance`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod messages;
pub mod sim_env;
pub mod sim_session;

pub use messages::{
    Commit, CommitBundle, KeyPackage, MessageError, ProposalBatch, Welcome, add_proposals,
    remove_proposals,
};
pub use sim_env::SimEnv;
pub use sim_session::SimSession;
