//! Host callback registry and reference traversal.
//!
//! Host callbacks often capture the adapter that calls them. If the adapter
//! owned the callback outright that would be a reference cycle no one could
//! break. Instead the [`CallbackRegistry`] owns every host callback; the
//! adapter keeps a [`CallbackId`] and a `Weak` to the registry, and the
//! engine gets a thunk that looks the callback up when it fires.
//!
//! The host breaks cycles with a collection pass: it lists the adapters it
//! can still reach, each reports the references it holds through
//! [`Traverse::collect_references`], and [`CallbackRegistry::sweep`] evicts
//! every callback nobody named.
//!
//! # Invariants
//!
//! - Ids are never reused
//! - A callback runs with the registry unborrowed, so it may register,
//!   unregister or drop adapters
//! - A callback is never entered twice at once; a reentrant invocation is
//!   skipped
//! - Evicted callbacks are dropped after the registry borrow is released

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt, iter, option,
    rc::Weak,
};

use dave_core::{FailureCallback, ProtocolVersionChangedCallback};

/// Registration handle for a host callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback#{}", self.0)
    }
}

/// A host callback owned by the registry.
pub enum HostCallback {
    /// Session failure callback, `(source, reason)`.
    Failure(FailureCallback),
    /// Encryptor protocol version change callback.
    VersionChanged(ProtocolVersionChangedCallback),
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure(_) => f.write_str("Failure(..)"),
            Self::VersionChanged(_) => f.write_str("VersionChanged(..)"),
        }
    }
}

enum Entry {
    Idle(HostCallback),
    Running,
}

/// Table of host callbacks, retained by the host.
#[derive(Default)]
pub struct CallbackRegistry {
    next_id: u64,
    entries: HashMap<CallbackId, Entry>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `callback`.
    pub fn register(&mut self, callback: HostCallback) -> CallbackId {
        self.next_id += 1;
        let id = CallbackId(self.next_id);
        self.entries.insert(id, Entry::Idle(callback));
        tracing::trace!(%id, "host callback registered");
        id
    }

    /// Removes a callback and returns it so the caller can drop it outside
    /// any borrow. A running callback is returned to its caller instead.
    pub fn unregister(&mut self, id: CallbackId) -> Option<HostCallback> {
        match self.entries.remove(&id)? {
            Entry::Idle(callback) => Some(callback),
            Entry::Running => None,
        }
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: CallbackId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts every callback not named in `reachable`.
    ///
    /// Running callbacks are kept. The evicted callbacks are returned; drop
    /// them after releasing the registry.
    #[must_use = "evicted callbacks must be dropped outside the registry borrow"]
    pub fn sweep(&mut self, reachable: impl IntoIterator<Item = HostRef>) -> Vec<HostCallback> {
        let live: HashSet<CallbackId> = reachable
            .into_iter()
            .filter_map(|r| match r {
                HostRef::Callback(id) => Some(id),
                HostRef::Type(_) => None,
            })
            .collect();

        let dead: Vec<CallbackId> = self
            .entries
            .iter()
            .filter(|(id, entry)| !live.contains(id) && matches!(entry, Entry::Idle(_)))
            .map(|(id, _)| *id)
            .collect();

        let evicted: Vec<HostCallback> =
            dead.into_iter().filter_map(|id| self.unregister(id)).collect();
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "swept unreachable host callbacks");
        }
        evicted
    }

    fn check_out(&mut self, id: CallbackId) -> Option<HostCallback> {
        let entry = self.entries.get_mut(&id)?;
        match std::mem::replace(entry, Entry::Running) {
            Entry::Idle(callback) => Some(callback),
            Entry::Running => {
                tracing::trace!(%id, "host callback already running, skipping");
                None
            },
        }
    }

    /// Puts a callback back; returns it if it was unregistered meanwhile.
    fn check_in(&mut self, id: CallbackId, callback: HostCallback) -> Option<HostCallback> {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                *entry = Entry::Idle(callback);
                None
            },
            None => Some(callback),
        }
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry").field("len", &self.len()).finish()
    }
}

fn invoke(
    registry: &Weak<RefCell<CallbackRegistry>>,
    id: CallbackId,
    run: impl FnOnce(&mut HostCallback),
) {
    let Some(registry) = registry.upgrade() else {
        tracing::trace!(%id, "registry dropped, host callback not invoked");
        return;
    };

    let taken = registry.borrow_mut().check_out(id);
    let Some(mut callback) = taken else {
        return;
    };

    run(&mut callback);

    let orphan = registry.borrow_mut().check_in(id, callback);
    drop(orphan);
}

/// Runs a registered failure callback.
pub(crate) fn invoke_failure(
    registry: &Weak<RefCell<CallbackRegistry>>,
    id: CallbackId,
    source: &str,
    reason: &str,
) {
    invoke(registry, id, |callback| match callback {
        HostCallback::Failure(f) => f(source, reason),
        HostCallback::VersionChanged(_) => {
            tracing::error!(%id, "callback registered as version change invoked as failure");
        },
    });
}

/// Runs a registered version change callback.
pub(crate) fn invoke_version_changed(registry: &Weak<RefCell<CallbackRegistry>>, id: CallbackId) {
    invoke(registry, id, |callback| match callback {
        HostCallback::VersionChanged(f) => f(),
        HostCallback::Failure(_) => {
            tracing::error!(%id, "callback registered as failure invoked as version change");
        },
    });
}

/// Unregisters an adapter's callback when the adapter goes away.
///
/// If the registry is borrowed the callback stays until the next sweep.
pub(crate) fn release(registry: &Weak<RefCell<CallbackRegistry>>, id: CallbackId) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let removed = match registry.try_borrow_mut() {
        Ok(mut registry) => registry.unregister(id),
        Err(_) => {
            tracing::trace!(%id, "registry busy, callback left for the next sweep");
            return;
        },
    };
    drop(removed);
}

/// A host-owned object an adapter refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostRef {
    /// The adapter's type identity.
    Type(&'static str),
    /// A registered callback.
    Callback(CallbackId),
}

/// Lazy sequence of an adapter's host references.
///
/// Finite, and restartable by cloning or by asking the adapter again.
#[derive(Debug, Clone)]
pub struct HostRefs(iter::Chain<iter::Once<HostRef>, option::IntoIter<HostRef>>);

impl HostRefs {
    /// References for an adapter of `type_name` holding `callback`.
    pub fn new(type_name: &'static str, callback: Option<CallbackId>) -> Self {
        Self(iter::once(HostRef::Type(type_name)).chain(callback.map(HostRef::Callback)))
    }
}

impl Iterator for HostRefs {
    type Item = HostRef;

    fn next(&mut self) -> Option<HostRef> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

/// Participation in the host's cycle collection.
pub trait Traverse {
    /// Every host reference this object holds.
    ///
    /// Must not be called while the object is being mutated.
    fn collect_references(&self) -> HostRefs;
}
