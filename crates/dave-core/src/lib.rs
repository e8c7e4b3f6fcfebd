//! Dave Core Engine
//!
//! The native side of the Dave end-to-end encryption layer: the frame
//! encryptor and decryptor, the session engine interface they receive key
//! ratchets from, and the engine log sink.
//!
//! # Design
//!
//! Engines are synchronous state machines. Time comes from an
//! [`Environment`] so transition windows can be driven by a simulated clock.
//! The only work that leaves the calling thread is the pairwise fingerprint
//! derivation, which a [`SessionEngine`] reports through a callback.
//!
//! # Components
//!
//! - [`FrameEncryptor`]: seals outgoing frames, per-media stats, passthrough
//! - [`codec`]: which bytes of a frame stay in the clear
//! - [`FrameDecryptor`]: opens incoming frames across ratchet transitions
//! - [`SessionEngine`]: group key agreement interface, tri-state commits
//! - [`log`]: process-wide log sink

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
mod config;
pub mod decryptor;
pub mod encryptor;
pub mod env;
mod error;
pub mod log;
pub mod session;
mod stats;

pub use config::{DEFAULT_TRANSITION_EXPIRY, DecryptorConfig, MAX_MISSING_NONCES};
pub use decryptor::FrameDecryptor;
pub use encryptor::{FrameEncryptor, ProtocolVersionChangedCallback};
pub use env::{Environment, SystemEnv};
pub use error::{DecryptError, EncryptError};
pub use log::{LoggingSeverity, set_log_sink};
pub use session::{CommitResult, FailureCallback, FingerprintCallback, SessionEngine, UserId};
pub use stats::{DecryptorStats, EncryptorStats};
