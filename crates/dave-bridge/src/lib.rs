//! Dave Host Bridge
//!
//! Host-side adapters for the Dave engines. The host runs a single-threaded
//! cooperative loop; the engines are synchronous except for the pairwise
//! fingerprint, which finishes on a worker thread.
//!
//! # Design
//!
//! Everything the host sees is either an owned value ([`Bytes`](bytes::Bytes),
//! [`RosterMap`](dave_proto::RosterMap), stats snapshots), a move-only
//! [`KeyRatchetHandle`], an [`Outcome`], or a [`CompletionToken`]. Worker
//! threads never touch host state: a fingerprint result travels as one
//! message through the [`CompletionBridge`] and is resolved when the host
//! calls [`Host::dispatch`] or awaits [`Host::run`].
//!
//! Host callbacks live in a [`CallbackRegistry`] retained by the [`Host`].
//! Adapters hold callback ids, never the callbacks, so a callback that
//! captures its own adapter forms no ownership cycle the host cannot break
//! with [`Host::sweep`].
//!
//! # Invariants
//!
//! - Each adapter owns exactly one engine, created with it and dropped with
//!   it
//! - Protocol rejections are values; per-frame failures are `None` plus an
//!   error log record
//! - Every completion token resolves at most once, on the host thread
//!
//! # Components
//!
//! - [`Session`]: session engine adapter
//! - [`Encryptor`] / [`Decryptor`]: frame engine adapters
//! - [`Host`]: per-thread context shared by the adapters
//! - [`marshal`]: host buffer conversion

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod completion;
mod decryptor;
mod encryptor;
mod error;
mod handle;
mod host;
mod logging;
pub mod marshal;
mod outcome;
pub mod registry;
mod session;

pub use completion::{CompletionBridge, CompletionToken, Completer, TokenId, TokenState};
pub use dave_core::{DEFAULT_TRANSITION_EXPIRY, DecryptorStats, EncryptorStats, UserId};
pub use dave_proto::{
    Codec, DISABLED_VERSION, INIT_TRANSITION_ID, MediaType, ProtocolVersion, RosterMap,
    max_supported_protocol_version,
};
pub use decryptor::Decryptor;
pub use encryptor::Encryptor;
pub use error::BridgeError;
pub use handle::{HandleId, KeyRatchetHandle};
pub use host::{BridgeConfig, Host};
pub use logging::{init_logging, install_engine_sink};
pub use outcome::{Outcome, RejectType};
pub use registry::{CallbackId, CallbackRegistry, HostRef, HostRefs, Traverse};
pub use session::Session;
