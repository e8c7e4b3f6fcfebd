//! Host context.
//!
//! One [`Host`] per host thread. It owns what the adapters share: the
//! completion bridge fingerprint results come back through, and the callback
//! registry. Adapters borrow it at construction and keep only non-owning or
//! cheaply cloned references.

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use dave_core::DecryptorConfig;
use serde::{Deserialize, Serialize};

use crate::{
    completion::CompletionBridge,
    logging,
    registry::{CallbackId, CallbackRegistry, HostCallback, HostRef, Traverse},
};

/// Bridge configuration, constructible from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Configuration for every decryptor created through this host.
    pub decryptor: DecryptorConfig,
    /// Route engine log records to `tracing` when the host is created.
    pub install_log_sink: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { decryptor: DecryptorConfig::default(), install_log_sink: true }
    }
}

/// Per-thread host context.
#[derive(Debug)]
pub struct Host {
    config: BridgeConfig,
    completions: CompletionBridge<Bytes>,
    registry: Rc<RefCell<CallbackRegistry>>,
}

impl Host {
    /// Creates a host context.
    pub fn new(config: BridgeConfig) -> Self {
        if config.install_log_sink && !logging::install_engine_sink() {
            tracing::trace!("engine log sink already installed");
        }
        Self {
            config,
            completions: CompletionBridge::new(),
            registry: Rc::new(RefCell::new(CallbackRegistry::new())),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Resolves every fingerprint result that has arrived. Never blocks.
    pub fn dispatch(&self) -> usize {
        self.completions.dispatch()
    }

    /// Resolves fingerprint results until none are pending.
    pub async fn run(&self) {
        self.completions.run().await;
    }

    /// Fingerprint requests still waiting for a result.
    pub fn pending_fingerprints(&self) -> usize {
        self.completions.pending_count()
    }

    /// Host callbacks currently registered.
    pub fn registered_callbacks(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Collection pass: evicts every callback not held by one of the
    /// `reachable` adapters. Returns the number evicted.
    pub fn sweep<'a>(&self, reachable: impl IntoIterator<Item = &'a dyn Traverse>) -> usize {
        let refs: Vec<HostRef> =
            reachable.into_iter().flat_map(|adapter| adapter.collect_references()).collect();
        let evicted = self.registry.borrow_mut().sweep(refs);
        let count = evicted.len();
        drop(evicted);
        count
    }

    pub(crate) fn completions(&self) -> CompletionBridge<Bytes> {
        self.completions.clone()
    }

    pub(crate) fn registry(&self) -> &Rc<RefCell<CallbackRegistry>> {
        &self.registry
    }

    pub(crate) fn register(&self, callback: HostCallback) -> CallbackId {
        self.registry.borrow_mut().register(callback)
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}
