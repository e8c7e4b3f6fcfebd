//! Opaque key ratchet handles.
//!
//! A [`KeyRatchetHandle`] is exclusive ownership of one engine key ratchet.
//! The host can hold it, give it to an encryptor or decryptor, or release
//! it, but never look inside or copy it. Ownership moves with the value:
//!
//! ```compile_fail
//! # use dave_bridge::KeyRatchetHandle;
//! fn reuse(handle: KeyRatchetHandle) {
//!     let first = handle.transfer();
//!     let second = handle.transfer(); // handle was moved
//! }
//! ```

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use dave_crypto::KeyRatchet;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a handle, stable across transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ratchet#{}", self.0)
    }
}

/// Owning handle to an engine key ratchet.
pub struct KeyRatchetHandle {
    id: HandleId,
    ratchet: Box<dyn KeyRatchet>,
}

impl KeyRatchetHandle {
    pub(crate) fn new(ratchet: Box<dyn KeyRatchet>) -> Self {
        let id = HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(%id, "key ratchet handle created");
        Self { id, ratchet }
    }

    /// Handle identity.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Moves ownership to a new binding.
    #[must_use = "dropping the transferred handle releases the ratchet"]
    pub fn transfer(self) -> Self {
        self
    }

    /// Destroys the ratchet.
    pub fn release(self) {
        tracing::trace!(id = %self.id, "key ratchet handle released");
    }

    pub(crate) fn into_ratchet(self) -> Box<dyn KeyRatchet> {
        self.ratchet
    }
}

impl fmt::Debug for KeyRatchetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyRatchetHandle").field(&self.id).finish()
    }
}
